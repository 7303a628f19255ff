//! Parser orchestration for collected timeline snippets: resolve a parser
//! against the registry, select the snippets it has not processed yet, run the
//! extraction routine over them with bounded concurrency and commit the results.

pub mod api;
pub mod commit;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod selection;
pub mod settings;
pub mod snippet;

#[cfg(test)]
pub(crate) mod testing;
