pub mod changelog;

pub use changelog::ChangeLog;
