//! Which sensor is attached to which line, and the handles keeping those lines claimed.

use heapless::Vec;
use log::{error, info};

use crate::config::MAX_LINES;
use crate::line::{EdgeHandler, LineId, LineList, LineProvider, SignalLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Nothing configured for this sensor
    Unset,
    Configured,
    /// The line could not be claimed or switched to input
    LineError,
    /// The falling-edge interrupt could not be registered
    CallbackError,
}

struct LineEntry<P: LineProvider> {
    id: LineId,
    status: LineStatus,
    line: Option<P::Line>,
    subscription: Option<P::Subscription>,
}

impl<P: LineProvider> LineEntry<P> {
    /// Failed entries keep their slot but hold no line.
    fn failed(id: LineId, status: LineStatus) -> Self {
        Self {
            id,
            status,
            line: None,
            subscription: None,
        }
    }
}

/// One entry per sensor, indexed by sensor number.
pub(crate) struct Registry<P: LineProvider> {
    provider: P,
    entries: Vec<LineEntry<P>, MAX_LINES>,
}

impl<P: LineProvider> Registry<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            entries: Vec::new(),
        }
    }

    pub fn line_list(&self) -> LineList {
        self.entries.iter().map(|entry| &entry.id).collect()
    }

    pub fn status(&self, sensor: usize) -> LineStatus {
        self.entries
            .get(sensor)
            .map_or(LineStatus::Unset, |entry| entry.status)
    }

    /// The line of `sensor`, if it is ready to be read.
    pub fn configured_line(&mut self, sensor: usize) -> Option<(LineId, &mut P::Line)> {
        let entry = self.entries.get_mut(sensor)?;
        if entry.status != LineStatus::Configured {
            return None;
        }
        let id = entry.id;
        entry.line.as_mut().map(|line| (id, line))
    }

    /// Replace the configured lines with `lines`, registering the handler built by
    /// `handler_for` on each of them.
    ///
    /// Returns `false` without touching anything if `lines` is already configured.
    pub fn apply(
        &mut self,
        lines: &LineList,
        mut handler_for: impl FnMut(LineId) -> EdgeHandler,
    ) -> bool {
        if self.line_list() == *lines {
            info!("Configuration request: lines unchanged");
            return false;
        }
        self.release_all();
        info!("Configure sensor lines");
        for &id in lines.as_slice() {
            let entry = self.install(id, &mut handler_for);
            if self.entries.push(entry).is_err() {
                break;
            }
        }
        info!("Configuration request: {} lines set", self.entries.len());
        true
    }

    /// Unregister every edge handler first, so none of them can fire for a released line.
    pub fn release_all(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        info!("Release all sensor lines");
        for entry in self.entries.iter_mut() {
            drop(entry.subscription.take());
        }
        self.entries.clear();
    }

    fn install(
        &mut self,
        id: LineId,
        handler_for: &mut impl FnMut(LineId) -> EdgeHandler,
    ) -> LineEntry<P> {
        let mut line = match self.provider.request(id) {
            Ok(line) => line,
            Err(err) => {
                error!("Requesting line {id} failed: {err:?}");
                return LineEntry::failed(id, LineStatus::LineError);
            }
        };
        if let Err(err) = line.listen() {
            error!("Initial switch of line {id} to input failed: {err:?}");
            return LineEntry::failed(id, LineStatus::LineError);
        }
        match self.provider.subscribe(&mut line, id, handler_for(id)) {
            Ok(subscription) => {
                info!("Line {id} configured");
                LineEntry {
                    id,
                    status: LineStatus::Configured,
                    line: Some(line),
                    subscription: Some(subscription),
                }
            }
            Err(err) => {
                error!("Registering the edge interrupt of line {id} failed: {err:?}");
                LineEntry::failed(id, LineStatus::CallbackError)
            }
        }
    }
}

impl<P: LineProvider> Drop for Registry<P> {
    fn drop(&mut self) {
        self.release_all();
    }
}
