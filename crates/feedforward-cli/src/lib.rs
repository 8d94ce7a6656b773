// feedforward-cli/src/lib.rs
// ============================================================================
// Module: FeedForward CLI Library
// Description: Shared helpers for assembling a live orchestrator from config.
// Purpose: Let the CLI binary and its integration tests build the same
//          collaborator wiring from one place.
// Dependencies: feedforward-broker, feedforward-config, feedforward-core,
//               feedforward-pipeline, feedforward-providers,
//               feedforward-store-sqlite
// ============================================================================

//! ## Overview
//! [`collaborators::build_orchestrator`] turns a loaded [`PipelineConfig`]
//! into a fully wired [`PipelineOrchestrator`] over the HTTP-backed
//! ticketing, LLM, and embedding collaborators and the `SQLite` run store.
//! The CLI binary is the only caller in production; tests call it the same
//! way against a temporary database.
//!
//! [`PipelineConfig`]: feedforward_config::PipelineConfig
//! [`PipelineOrchestrator`]: feedforward_pipeline::PipelineOrchestrator

pub mod collaborators;
