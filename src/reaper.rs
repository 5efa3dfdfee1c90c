//! Releases everything an export run attached to the document.

use crate::dom::{Document, RunId};
use crate::surface::OffscreenSurface;

/// What a reap pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub listeners_unbound: usize,
    pub containers_removed: usize,
    pub leftover_nodes_removed: usize,
}

/// Owns the run's surface and tears it down exactly once.
///
/// Reaping also happens on drop, so a panicking or abandoned run still
/// leaves the document clean.
#[derive(Debug)]
pub struct ResourceReaper {
    document: Document,
    run: RunId,
    surface: Option<OffscreenSurface>,
    reaped: bool,
}

impl ResourceReaper {
    pub fn new(document: Document, run: RunId) -> Self {
        Self { document, run, surface: None, reaped: false }
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    /// Take ownership of the surface; returned for the rest of the run to use
    pub fn adopt_surface(&mut self, surface: OffscreenSurface) -> &mut OffscreenSurface {
        self.surface.insert(surface)
    }

    pub fn is_reaped(&self) -> bool {
        self.reaped
    }

    /// Unbind listeners, detach the container, then sweep any node the run still owns.
    ///
    /// Every step runs regardless of what the previous one found. A second
    /// call is a no-op.
    pub fn reap(&mut self) -> ReapReport {
        let mut report = ReapReport::default();
        if self.reaped {
            return report;
        }
        self.reaped = true;

        if let Some(mut surface) = self.surface.take() {
            report.listeners_unbound = surface.unbind_listeners();
            match surface.take_container() {
                Some(container) if self.document.is_attached(container.id()) => {
                    if container.remove() {
                        report.containers_removed = 1;
                    }
                }
                Some(_) => log::debug!("surface {} container was already detached", surface.id()),
                None => {}
            }
        }

        report.leftover_nodes_removed = self.document.detach_owned_by(self.run);
        if report.leftover_nodes_removed > 0 {
            log::warn!("run {} left {} node(s) attached", self.run.0, report.leftover_nodes_removed);
        }
        log::debug!("run {} reaped: {:?}", self.run.0, report);
        report
    }
}

impl Drop for ResourceReaper {
    fn drop(&mut self) {
        if !self.reaped {
            self.reap();
        }
    }
}
