//! Endpoint pair enumeration.
//!
//! A client block opens many connections per session; which (source,
//! destination) tuple each attempt uses is driven by a connection pattern
//! over the cross product of two interface enumerators. The enumerators
//! themselves come from interface discovery, outside this crate; this
//! module only walks them.

use crate::error::{Error, Result};
use crate::structs::{ConnectionPattern, EndpointPair};
use std::net::IpAddr;

/// Capability supplied by interface discovery: a cyclic cursor over the
/// candidate endpoints on one side of the connection. `next` wraps per the
/// implementation's own semantics; `total_count` is assumed stable while a
/// pattern walk is in progress.
pub trait IfEnum {
    fn total_count(&self) -> usize;
    fn reset(&mut self);
    fn next(&mut self);
    fn set_port_num(&mut self, port: u16);
    // source interfaces carry a name, destinations usually none
    fn if_name(&self) -> Option<&str>;
    fn addr(&self) -> IpAddr;
}

/// Pattern-driven cursor over the (source, destination) cross product.
///
/// Not safe for concurrent use; each concurrently driven session owns its
/// own enumerator and sub-enumerators.
pub struct EndpointPairEnumerator {
    port: u16, // logging context only
    pattern: ConnectionPattern,
    src: Box<dyn IfEnum>,
    dst: Box<dyn IfEnum>,
    src_idx: usize,
    dst_idx: usize,
}

impl EndpointPairEnumerator {
    pub fn new(port: u16, src: Box<dyn IfEnum>, dst: Box<dyn IfEnum>) -> Self {
        log::debug!(
            "port {port}: endpoint enumerator over {} sources x {} destinations",
            src.total_count(),
            dst.total_count()
        );
        EndpointPairEnumerator {
            port,
            pattern: ConnectionPattern::default(),
            src,
            dst,
            src_idx: 0,
            dst_idx: 0,
        }
    }

    /// Select the connection pattern from its numeric wire value. An
    /// unrecognized value is a configuration error and leaves the active
    /// pattern unchanged.
    pub fn set_pattern(&mut self, raw: u32) -> Result<()> {
        self.pattern = match raw {
            0 => ConnectionPattern::Pair,
            1 => ConnectionPattern::BackboneSrcFirst,
            2 => ConnectionPattern::BackboneDstFirst,
            3 => ConnectionPattern::BackboneInterleaved,
            other => return Err(Error::BadPattern(other)),
        };
        Ok(())
    }

    pub fn get_pattern(&self) -> ConnectionPattern {
        self.pattern
    }

    pub fn set_src_port_num(&mut self, port: u16) {
        self.src.set_port_num(port);
    }

    pub fn set_dst_port_num(&mut self, port: u16) {
        self.dst.set_port_num(port);
    }

    pub fn get_src_total_count(&self) -> usize {
        self.src.total_count()
    }

    pub fn get_dst_total_count(&self) -> usize {
        self.dst.total_count()
    }

    pub fn reset(&mut self) {
        log::trace!("port {}: endpoint enumerator reset", self.port);
        self.src.reset();
        self.dst.reset();
        self.src_idx = 0;
        self.dst_idx = 0;
    }

    /// Advance to the endpoint pair for the next connection attempt.
    pub fn next(&mut self) {
        match self.pattern {
            // Both cursors move in lockstep; whichever axis runs out first
            // rewinds the whole walk.
            ConnectionPattern::Pair => {
                self.src_idx += 1;
                self.src.next();
                self.dst_idx += 1;
                self.dst.next();
                if self.src_idx >= self.src.total_count()
                    || self.dst_idx >= self.dst.total_count()
                {
                    self.reset();
                }
            }
            // All sources against the current destination; the destination
            // steps once per source wraparound. Detecting a full
            // destination cycle is the caller's job, via
            // get_dst_total_count.
            ConnectionPattern::BackboneSrcFirst => {
                self.src_idx += 1;
                self.src.next();
                if self.src_idx >= self.src.total_count() {
                    self.src.reset();
                    self.src_idx = 0;
                    self.dst_idx += 1;
                    self.dst.next();
                    if self.dst_idx >= self.dst.total_count() {
                        self.dst_idx = 0;
                    }
                }
            }
            ConnectionPattern::BackboneDstFirst => {
                self.dst_idx += 1;
                self.dst.next();
                if self.dst_idx >= self.dst.total_count() {
                    self.dst.reset();
                    self.dst_idx = 0;
                    self.src_idx += 1;
                    self.src.next();
                    if self.src_idx >= self.src.total_count() {
                        self.src_idx = 0;
                    }
                }
            }
            // Both cursors free-run; each side wraps on its own.
            ConnectionPattern::BackboneInterleaved => {
                self.src_idx += 1;
                self.src.next();
                if self.src_idx >= self.src.total_count() {
                    self.src_idx = 0;
                }
                self.dst_idx += 1;
                self.dst.next();
                if self.dst_idx >= self.dst.total_count() {
                    self.dst_idx = 0;
                }
            }
        }
    }

    pub fn get_endpoint_pair(&self) -> EndpointPair {
        EndpointPair {
            src_if_name: self.src.if_name().unwrap_or_default().to_string(),
            src_addr: self.src.addr(),
            dst_addr: self.dst.addr(),
        }
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> (usize, usize) {
        (self.src_idx, self.dst_idx)
    }
}
