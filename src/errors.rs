// ABOUTME: Unified error handling re-exported from the core crate
// ABOUTME: Routes and services import AppError, ErrorCode and ChatError from here
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Error types live in `colloquy-core` so they compile once for the workspace.

pub use colloquy_core::errors::*;
