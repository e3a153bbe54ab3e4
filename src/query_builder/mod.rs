//! Query builders which turn filters into SQL fragments.

pub mod sql_builder;
