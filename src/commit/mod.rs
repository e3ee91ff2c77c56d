pub mod apply;
pub mod rollback;
pub mod tx;
