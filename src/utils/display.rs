// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/// Renders a value as one debug line per logical element, for test
/// expectations and tracing output.
pub trait DebugLines {
    fn debug_lines(&self) -> Vec<String>;
}

impl<T: DebugLines> DebugLines for Vec<T> {
    fn debug_lines(&self) -> Vec<String> {
        self.iter().flat_map(|t| t.debug_lines()).collect()
    }
}
