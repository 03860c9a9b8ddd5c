//! # Crawler Module
//!
//! Implements the engine that runs a catalog crawl.
//!
//! ## Overview
//!
//! The crawler module provides the main `Crawler` struct and the tasks it
//! spawns. It coordinates the scheduler, the page fetcher, the throttle, the
//! extraction engine and the item sink.
//!
//! ## Key Components
//!
//! - **Crawler**: The central orchestrator that manages the crawling lifecycle
//! - **Downloader Task**: Dequeues requests, paces them and fetches pages, with retries
//! - **Parser Task**: Extracts items and links, merges links into the frontier
//! - **Item Processor**: Writes items to the sink and enforces the item limit
//!
//! ## Architecture
//!
//! Each stage runs in its own Tokio task. Stages communicate through bounded
//! `kanal` channels: fetched documents flow from the downloader to the
//! parser, items from the parser to the item processor.

mod core;
mod item_processor;
mod request_handler;
mod response_parser;

pub use core::Crawler;
pub(crate) use item_processor::spawn_item_processor_task;
pub(crate) use request_handler::spawn_downloader_task;
pub(crate) use response_parser::spawn_parser_task;
