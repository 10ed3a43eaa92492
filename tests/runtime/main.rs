mod common;

mod builtin_modules;
mod esm_import;
mod execute;
mod lifecycle;
mod require_graph;
mod watchers;
