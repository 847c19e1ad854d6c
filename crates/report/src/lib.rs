pub mod enrich;
pub mod extractor;
pub mod namespace;
pub mod orchestrator;
pub mod progress;
#[cfg(test)]
mod testing;
