// src/tests/mod.rs
//! Engine tests across policy resolution, algorithm and storage
