// ABOUTME: Application constants re-exported from the core crate
// ABOUTME: Limits, defaults, media types and signal names grouped by domain
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use colloquy_core::constants::*;
