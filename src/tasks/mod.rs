//! The three model-backed tasks.
//!
//! | Task | Default provider | Output |
//! |------|------------------|--------|
//! | [`extraction`] | Qianfan | [`ExtractedInfo`](extraction::ExtractedInfo) printed as JSON |
//! | [`segmentation`] | Qianfan | model text, unchanged |
//! | [`qa`] | Moonshot | QA records appended to a dataset file |

pub mod extraction;
pub mod qa;
pub mod segmentation;

pub use extraction::{extract, parse_labeled_fields, ExtractedInfo, ExtractedInfoParser};
pub use qa::{QaGenerator, QaPair, QaPairs, RunSummary};
pub use segmentation::segment;
