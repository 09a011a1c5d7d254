pub mod analysis;
pub mod auth;
pub mod object_store;
pub mod shot_repository;
pub mod shot_service;
