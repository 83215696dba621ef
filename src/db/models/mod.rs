//! Database models split into domain-specific modules.

pub mod announcement;
pub mod attendance;
pub mod audit;
pub mod class;
pub mod grade;
pub mod homework;
pub mod parent;
pub mod schedule;
pub mod school;
pub mod stats;
pub mod subject;
pub mod user;

pub use announcement::*;
pub use attendance::*;
pub use audit::*;
pub use class::*;
pub use grade::*;
pub use homework::*;
pub use parent::*;
pub use schedule::*;
pub use school::*;
pub use stats::*;
pub use subject::*;
pub use user::*;
