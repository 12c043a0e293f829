//! Compressed market-data cache reader library.
//!
//! This crate reads the append-only, LZ4 block-compressed cache files that
//! store depth updates, trades, symbol metadata and OHLCV candles:
//!
//! - `message`: fixed binary layouts and zero-copy views over single messages
//! - `reader`: block decompression and the message cursor state machine
//! - `ffi`: C-callable handle surface for driving readers from host processes
//!
//! The binary in this repository (`src/bin/player.rs`) uses these modules to
//! dump cache files for inspection.
pub mod ffi;
pub mod message;
pub mod reader;
