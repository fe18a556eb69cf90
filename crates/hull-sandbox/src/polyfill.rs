// SPDX-License-Identifier: MIT OR Apache-2.0
//! Polyfill tier: Landlock for filesystem visibility, seccomp for the
//! syscall families.
//!
//! Unveil entries are collected as Landlock rules and applied at seal
//! time; the pledge step compiles the token set into a BPF filter whose
//! mismatch action is kill, so violations terminate loudly instead of
//! surfacing as EPERM.

use crate::SandboxError;
use hull_manifest::UnveilPerm;
use landlock::{
    ABI, Access, AccessFs, PathBeneath, PathFd, Ruleset, RulesetAttr, RulesetCreated,
    RulesetCreatedAttr,
};
use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

const LANDLOCK_ABI: ABI = ABI::V2;

pub(crate) struct Enforcer {
    armed: bool,
    ruleset: Option<RulesetCreated>,
}

impl Enforcer {
    pub(crate) fn new(armed: bool) -> Self {
        Self {
            armed,
            ruleset: None,
        }
    }

    pub(crate) fn unveil(&mut self, path: &Path, perm: UnveilPerm) -> Result<(), SandboxError> {
        if !self.armed {
            return Ok(());
        }
        // Landlock rules need an existing path to open. A not-yet-created
        // target (a fresh WAL sidecar, say) falls back to a rule on its
        // parent directory so the create is still possible after sealing.
        let target: &Path = if path.exists() {
            path
        } else {
            match path.parent().filter(|p| p.exists()) {
                Some(parent) => {
                    warn!(path = %path.display(), "missing unveil target, widening to parent");
                    parent
                }
                None => {
                    warn!(path = %path.display(), "missing unveil target, no landlock rule");
                    return Ok(());
                }
            }
        };
        let created = match self.ruleset.take() {
            Some(r) => r,
            None => Ruleset::default()
                .handle_access(AccessFs::from_all(LANDLOCK_ABI))
                .map_err(|e| unveil_err(path, &e))?
                .create()
                .map_err(|e| unveil_err(path, &e))?,
        };
        let access = match perm {
            UnveilPerm::Read => AccessFs::from_read(LANDLOCK_ABI),
            UnveilPerm::ReadWriteCreate => AccessFs::from_all(LANDLOCK_ABI),
        };
        let fd = PathFd::new(target).map_err(|e| unveil_err(target, &e))?;
        let created = created
            .add_rule(PathBeneath::new(fd, access))
            .map_err(|e| unveil_err(path, &e))?;
        self.ruleset = Some(created);
        Ok(())
    }

    pub(crate) fn seal(&mut self) -> Result<(), SandboxError> {
        if !self.armed {
            return Ok(());
        }
        match self.ruleset.take() {
            Some(created) => {
                let _status = created.restrict_self().map_err(|e| SandboxError::Unveil {
                    path: "<seal>".into(),
                    detail: e.to_string(),
                })?;
            }
            None => {
                // Nothing was unveiled; an absent manifest applies no
                // filesystem policy at all.
                warn!("sealing with no unveil entries; landlock not engaged");
            }
        }
        Ok(())
    }

    pub(crate) fn pledge(&mut self, tokens: &[&'static str]) -> Result<(), SandboxError> {
        if !self.armed {
            return Ok(());
        }
        let line = tokens.join(" ");
        let filter = build_filter(tokens).map_err(|detail| SandboxError::Pledge {
            line: line.clone(),
            detail,
        })?;
        seccompiler::apply_filter(&filter).map_err(|e| SandboxError::Pledge {
            line,
            detail: e.to_string(),
        })
    }
}

fn unveil_err(path: &Path, err: &dyn std::fmt::Display) -> SandboxError {
    SandboxError::Unveil {
        path: path.display().to_string(),
        detail: err.to_string(),
    }
}

fn build_filter(tokens: &[&'static str]) -> Result<BpfProgram, String> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    for syscall in allowed_syscalls(tokens) {
        rules.entry(syscall).or_default();
    }
    let filter = SeccompFilter::new(
        rules,
        // Undeclared syscall family: kill, not EPERM, so violations are
        // loud and unmissable.
        SeccompAction::KillProcess,
        SeccompAction::Allow,
        target_arch(),
    )
    .map_err(|e| e.to_string())?;
    filter.try_into().map_err(|e: seccompiler::BackendError| e.to_string())
}

#[cfg(target_arch = "x86_64")]
fn target_arch() -> TargetArch {
    TargetArch::x86_64
}

#[cfg(target_arch = "aarch64")]
fn target_arch() -> TargetArch {
    TargetArch::aarch64
}

// Pledge-token to syscall-family mapping. The stdio family is the
// baseline every Hull process needs: memory management, signals, event
// polling, and already-open descriptors.
fn allowed_syscalls(tokens: &[&'static str]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::new();

    // stdio is always present in derived promises.
    out.extend_from_slice(&[
        libc::SYS_read,
        libc::SYS_write,
        libc::SYS_readv,
        libc::SYS_writev,
        libc::SYS_pread64,
        libc::SYS_pwrite64,
        libc::SYS_close,
        libc::SYS_fstat,
        libc::SYS_newfstatat,
        libc::SYS_lseek,
        libc::SYS_mmap,
        libc::SYS_mprotect,
        libc::SYS_munmap,
        libc::SYS_madvise,
        libc::SYS_brk,
        libc::SYS_rt_sigaction,
        libc::SYS_rt_sigprocmask,
        libc::SYS_rt_sigreturn,
        libc::SYS_sigaltstack,
        libc::SYS_ioctl,
        libc::SYS_fcntl,
        libc::SYS_fsync,
        libc::SYS_fdatasync,
        libc::SYS_ftruncate,
        libc::SYS_exit,
        libc::SYS_exit_group,
        libc::SYS_futex,
        libc::SYS_clock_gettime,
        libc::SYS_clock_nanosleep,
        libc::SYS_nanosleep,
        libc::SYS_getpid,
        libc::SYS_gettid,
        libc::SYS_getrandom,
        libc::SYS_sched_yield,
        libc::SYS_epoll_create1,
        libc::SYS_epoll_ctl,
        libc::SYS_epoll_pwait,
        libc::SYS_ppoll,
        libc::SYS_pipe2,
        libc::SYS_dup,
        libc::SYS_dup3,
        libc::SYS_prlimit64,
        libc::SYS_getdents64,
        libc::SYS_restart_syscall,
        // The transport's listening socket exists before the filter
        // lands; accepting and answering on it is part of the baseline.
        libc::SYS_accept4,
        libc::SYS_getsockname,
        libc::SYS_setsockopt,
        libc::SYS_shutdown,
    ]);

    for token in tokens {
        match *token {
            "rpath" => out.extend_from_slice(&[
                libc::SYS_openat,
                libc::SYS_faccessat,
                libc::SYS_readlinkat,
                libc::SYS_statx,
                libc::SYS_getcwd,
                libc::SYS_chdir,
                libc::SYS_flock,
            ]),
            "wpath" | "cpath" => out.extend_from_slice(&[
                libc::SYS_openat,
                libc::SYS_mkdirat,
                libc::SYS_unlinkat,
                libc::SYS_renameat,
                libc::SYS_linkat,
                libc::SYS_symlinkat,
                libc::SYS_utimensat,
            ]),
            "flock" => out.push(libc::SYS_flock),
            "inet" | "dns" => out.extend_from_slice(&[
                libc::SYS_socket,
                libc::SYS_connect,
                libc::SYS_bind,
                libc::SYS_listen,
                libc::SYS_accept4,
                libc::SYS_sendto,
                libc::SYS_recvfrom,
                libc::SYS_sendmsg,
                libc::SYS_recvmsg,
                libc::SYS_shutdown,
                libc::SYS_getsockname,
                libc::SYS_getpeername,
                libc::SYS_setsockopt,
                libc::SYS_getsockopt,
            ]),
            // stdio handled above; unknown tokens have no kernel meaning
            // in the polyfill.
            _ => {}
        }
    }

    out.sort_unstable();
    out.dedup();
    out
}
