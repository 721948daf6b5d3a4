//! ADS deploy pipeline
//!
//! Message-driven deployment orchestration. A deploy request enters at
//! BeforeDeploy and travels stage to stage over topics on one exchange:
//!
//! - BeforeDeploy waits for the environment to be ready
//! - Deploy (or Restart) changes the environment
//! - Test verifies it
//! - AfterDeploy records when the environment was last used
//! - ErrorHandler turns failures into status events
//!
//! Every stage reports progress on the status topic and keeps the
//! deployment record in the store up to date.

pub mod api;
pub mod bus;
pub mod config;
pub mod db;
pub mod executioner;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod stages;
pub mod worker;
