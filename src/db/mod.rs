pub mod blob_store;
pub mod topic_repository;
