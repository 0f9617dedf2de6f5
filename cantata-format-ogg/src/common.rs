// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cantata_core::meta::MetadataRevision;

/// Data that was extracted from a logical stream's header packets as a side-effect of reading
/// pages.
pub enum SideData {
    /// A metadata revision.
    Metadata(MetadataRevision),
}
