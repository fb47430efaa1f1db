//! camstream - dual-path camera acquisition server
//!
//! Controls an imaging sensor with two independent capture paths: a
//! continuous low-latency MJPEG preview stream and an on-demand
//! high-resolution still capture, both exposed over HTTP while the device
//! keeps producing frames in the background.
//!
//! ## Architecture
//!
//! 1. device - abstract camera capability interface + virtual backend
//! 2. codec - packed-RGB image encoding (JPEG)
//! 3. pixel - scan-line stride handling and the preview pixel buffer
//! 4. frame_cache - single-slot latest-frame hand-off to stream readers
//! 5. still_capture - one-at-a-time snapshot request/response coordination
//! 6. engine - device session lifecycle and the background acquisition loop
//! 7. web_api - REST/MJPEG endpoints
//!
//! ## Design principles
//!
//! - One engine instance owns exactly one device session (single writer)
//! - The frame cache is latest-wins: coalescing is normal, reordering never
//! - Still capture is single-slot: concurrent requests are rejected

pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame_cache;
pub mod models;
pub mod pixel;
pub mod state;
pub mod still_capture;
pub mod web_api;
