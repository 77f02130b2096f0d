//! Paggo Server Library
//!
//! Invoice upload, OCR text extraction and document Q&A. The server binary
//! is in main.rs.
//!
//! # Modules
//!
//! - `ocr`: text extraction pipeline (PDF text layer, rasterized OCR, image OCR)
//! - `ingest`: upload coordinator driving the document lifecycle
//! - `ask`: question answering over extracted text
//! - `llm`: OpenAI and Gemini backends
//! - `export`: PDF of the original with OCR and chat appendices
//! - `routes`: HTTP API

pub mod ask;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod llm;
pub mod ocr;
pub mod routes;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;
