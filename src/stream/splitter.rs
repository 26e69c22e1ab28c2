use std::sync::Arc;

use memchr::memmem;

use crate::util::partial_prefix_suffix_len;

// Reasoning-tag splitter.
//
// The backend interleaves reasoning text with visible text on one channel,
// delimited by an open and a close marker. Markers may straddle any number of
// delivered chunks, so the splitter holds back the shortest suffix that could
// still grow into the marker it is currently looking for and classifies it
// once the next fragment (or the end of stream) decides.
//
// Invariants:
// - `pending` is always a strict prefix of the marker for the current mode,
//   so it never exceeds `marker.len() - 1` bytes.
// - Marker text is consumed and never appears in either output channel.
// - The concatenated output is independent of how the input was chunked.

struct MarkerPair {
    open: String,
    close: String,
    open_finder: memmem::Finder<'static>,
    close_finder: memmem::Finder<'static>,
}

/// Open/close marker strings delimiting a reasoning section.
#[derive(Clone)]
pub struct ReasoningMarkers {
    inner: Arc<MarkerPair>,
}

impl ReasoningMarkers {
    /// Empty markers fall back to `<think>` / `</think>`.
    #[must_use]
    pub fn new(open: &str, close: &str) -> Self {
        let open = if open.is_empty() { "<think>" } else { open };
        let close = if close.is_empty() { "</think>" } else { close };
        Self {
            inner: Arc::new(MarkerPair {
                open_finder: memmem::Finder::new(open.as_bytes()).into_owned(),
                close_finder: memmem::Finder::new(close.as_bytes()).into_owned(),
                open: open.to_string(),
                close: close.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn open(&self) -> &str {
        &self.inner.open
    }

    #[must_use]
    pub fn close(&self) -> &str {
        &self.inner.close
    }

    /// Wrap `reasoning` in the markers.
    #[must_use]
    pub fn wrap(&self, reasoning: &str) -> String {
        let mut out =
            String::with_capacity(self.inner.open.len() + reasoning.len() + self.inner.close.len());
        out.push_str(&self.inner.open);
        out.push_str(reasoning);
        out.push_str(&self.inner.close);
        out
    }

    fn for_mode(&self, mode: SplitMode) -> (&str, &memmem::Finder<'static>) {
        match mode {
            SplitMode::OutsideReasoning => (&self.inner.open, &self.inner.open_finder),
            SplitMode::InsideReasoning => (&self.inner.close, &self.inner.close_finder),
        }
    }
}

impl Default for ReasoningMarkers {
    fn default() -> Self {
        Self::new("<think>", "</think>")
    }
}

impl std::fmt::Debug for ReasoningMarkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningMarkers")
            .field("open", &self.inner.open)
            .field("close", &self.inner.close)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    OutsideReasoning,
    InsideReasoning,
}

impl SplitMode {
    fn toggled(self) -> Self {
        match self {
            SplitMode::OutsideReasoning => SplitMode::InsideReasoning,
            SplitMode::InsideReasoning => SplitMode::OutsideReasoning,
        }
    }
}

/// Text classified by one [`ReasoningSplitter::feed`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitDelta {
    pub visible: String,
    pub reasoning: String,
}

impl SplitDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty() && self.reasoning.is_empty()
    }
}

/// Stateful scanner separating reasoning markup from visible content.
pub struct ReasoningSplitter {
    markers: ReasoningMarkers,
    mode: SplitMode,
    pending: String,
    visible_buffer: String,
    reasoning_buffer: String,
}

impl ReasoningSplitter {
    #[must_use]
    pub fn new(markers: ReasoningMarkers) -> Self {
        Self {
            markers,
            mode: SplitMode::OutsideReasoning,
            pending: String::new(),
            visible_buffer: String::new(),
            reasoning_buffer: String::new(),
        }
    }

    /// Classify one incoming fragment.
    pub fn feed(&mut self, fragment: &str) -> SplitDelta {
        let mut delta = SplitDelta::default();
        if fragment.is_empty() {
            return delta;
        }

        let markers = self.markers.clone();
        let mut work = std::mem::take(&mut self.pending);
        work.push_str(fragment);
        let mut rest = work.as_str();

        loop {
            let (marker, finder) = markers.for_mode(self.mode);
            if let Some(pos) = finder.find(rest.as_bytes()) {
                self.emit(&mut delta, &rest[..pos]);
                rest = &rest[pos + marker.len()..];
                self.mode = self.mode.toggled();
                continue;
            }

            let hold = partial_prefix_suffix_len(rest, marker);
            let split = rest.len() - hold;
            self.emit(&mut delta, &rest[..split]);
            self.pending.push_str(&rest[split..]);
            break;
        }

        delta
    }

    /// Flush held-back text at end of stream. A pending partial marker was
    /// never a marker, so it belongs to whichever mode is active.
    pub fn finish(&mut self) -> SplitDelta {
        let mut delta = SplitDelta::default();
        let pending = std::mem::take(&mut self.pending);
        self.emit(&mut delta, &pending);
        delta
    }

    fn emit(&mut self, delta: &mut SplitDelta, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.mode {
            SplitMode::OutsideReasoning => {
                self.visible_buffer.push_str(text);
                delta.visible.push_str(text);
            }
            SplitMode::InsideReasoning => {
                self.reasoning_buffer.push_str(text);
                delta.reasoning.push_str(text);
            }
        }
    }

    #[must_use]
    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    #[must_use]
    pub fn visible(&self) -> &str {
        &self.visible_buffer
    }

    #[must_use]
    pub fn reasoning(&self) -> &str {
        &self.reasoning_buffer
    }

    #[must_use]
    pub fn markers(&self) -> &ReasoningMarkers {
        &self.markers
    }
}
