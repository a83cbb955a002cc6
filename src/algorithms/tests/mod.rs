// src/algorithms/tests/mod.rs

// Tests for Fixed Window algorithm
mod fixed_window_tests;
