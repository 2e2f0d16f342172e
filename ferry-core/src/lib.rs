//! Ferry Core
//!
//! Core types and abstractions for the Ferry release orchestrator.
//!
//! This crate contains:
//! - Domain types: Core release entities (BuildSpec, ImageArtifact, TagSet, etc.)
//! - DTOs: Data transfer objects for the cluster API and the run API

pub mod domain;
pub mod dto;
