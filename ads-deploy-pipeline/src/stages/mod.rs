//! Pipeline stages
//!
//! Each stage decides the fate of one payload and leaves publishing,
//! status and acknowledgement to the worker engine.

mod after_deploy;
mod before_deploy;
mod deploy;
mod error_handler;
mod restart;
mod test_suite;

#[cfg(test)]
pub(crate) mod testing;

pub use after_deploy::AfterDeploy;
pub use before_deploy::BeforeDeploy;
pub use deploy::Deploy;
pub use error_handler::ErrorHandler;
pub use restart::Restart;
pub use test_suite::TestSuite;

use ads_deploy_core::domain::topology::StageKind;
use std::sync::Arc;

use crate::worker::Stage;

/// The stage implementation behind a topology entry
pub fn for_kind(kind: StageKind) -> Arc<dyn Stage> {
    match kind {
        StageKind::BeforeDeploy => Arc::new(BeforeDeploy),
        StageKind::Deploy => Arc::new(Deploy),
        StageKind::Test => Arc::new(TestSuite),
        StageKind::Restart => Arc::new(Restart),
        StageKind::AfterDeploy => Arc::new(AfterDeploy),
        StageKind::ErrorHandler => Arc::new(ErrorHandler),
    }
}
