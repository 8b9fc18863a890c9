//! Single-team variant
//!
//! Root tables hold records directly; everything lands in the default team.
//! Every stage is the trait default.

use super::strategy::{PipelineStrategy, RootNames};

#[derive(Debug, Default, Clone, Copy)]
pub struct MonolithStrategy;

impl PipelineStrategy for MonolithStrategy {
    fn name(&self) -> &'static str {
        "monolith"
    }

    fn roots(&self) -> RootNames {
        RootNames {
            config: "MonDKP_DB",
            standings: "MonDKP_DKPTable",
            loot: "MonDKP_Loot",
            history: "MonDKP_DKPHistory",
        }
    }
}
