pub mod blob_service;
pub mod catalog_service;
pub mod session_service;
pub mod uploader;
pub mod versioned_store;
