// Copyright 2026 The Dictamd Project
// SPDX-License-Identifier: Apache-2.0

pub mod batch;
pub mod completion;
pub mod config;
pub mod pipeline;
pub mod relay;
pub mod segment;
