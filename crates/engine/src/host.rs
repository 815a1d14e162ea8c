// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host filter.
//!
//! A job's `Host` pins it to one machine. Execution is skipped when
//! the filter matches neither the hostname nor any local interface
//! address; the schedule still advances so the job does not pile up
//! triggers on the wrong supervisor.

/// Does this machine match the job's host filter? An empty filter
/// always matches.
pub fn current_host(host: &str) -> bool {
    if host.is_empty() {
        return true;
    }
    if let Ok(name) = nix::unistd::gethostname() {
        if name.to_string_lossy() == host {
            return true;
        }
    }
    match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => {
            for ifaddr in addrs {
                let Some(addr) = ifaddr.address else { continue };
                let ip = if let Some(v4) = addr.as_sockaddr_in() {
                    std::net::IpAddr::from(v4.ip()).to_string()
                } else if let Some(v6) = addr.as_sockaddr_in6() {
                    std::net::IpAddr::from(v6.ip()).to_string()
                } else {
                    continue;
                };
                if ip == host {
                    return true;
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "cannot list interface addresses"),
    }
    false
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
