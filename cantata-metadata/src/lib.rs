// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cantata's metadata reader crate.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod vorbis;
