pub mod directory_watcher;
pub mod indexing_engine;
pub mod retrieval_service;
pub mod scorer;
