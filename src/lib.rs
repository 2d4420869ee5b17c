//! # Paper Feed
//!
//! Backend for a personalized academic-paper feed with AI content enrichment.
//!
//! Paper Feed ingests papers from arXiv and conference dumps, embeds them,
//! ranks them per user against a profile built from their interactions, and
//! generates translations, plain-language interpretations, narrated audio and
//! infographics on request. Everything is reachable through the `pfeed` CLI
//! and a JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Sources   │──▶│   Ingest    │──▶│  SQLite  │
//! │ arXiv/Conf  │   │ Dedup+Embed │   │          │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!                ┌─────────────────────────┼──────────────┐
//!                ▼                         ▼              ▼
//!          ┌───────────┐            ┌────────────┐  ┌──────────┐
//!          │  Ranking  │            │ Enrichment │  │   HTTP   │
//!          │ per user  │            │  (AI API)  │  │   API    │
//!          └───────────┘            └────────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pfeed init                       # create database
//! pfeed ingest arxiv               # fetch the latest papers
//! pfeed embed pending              # generate embeddings
//! pfeed user add ada --category cs.CL
//! pfeed recommend ada
//! pfeed serve                      # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`arxiv`] | arXiv API client and Atom parser |
//! | [`conference`] | Conference dump loader |
//! | [`ingest`] | Incremental ingestion pipeline |
//! | [`papers`] | Paper storage and dedup |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Embedding backfill and rebuild |
//! | [`users`] | Users, interactions, library |
//! | [`profile`] | User profile vectors |
//! | [`ranking`] | Candidate filtering, scoring, windowing |
//! | [`recommend`] | Per-user feeds and snapshots |
//! | [`enrichment`] | AI content queue and generators |
//! | [`server`] | HTTP API |
//! | [`pipeline`] | Batch run for cron |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod arxiv;
pub mod conference;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod enrichment;
pub mod get;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod papers;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod ranking;
pub mod recommend;
pub mod server;
pub mod stats;
pub mod users;

#[cfg(test)]
mod testutil;
