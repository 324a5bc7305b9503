//! Field-wise equality that can ignore volatile fields.
//!
//! Used to decide whether an existing record is "the same" as one a retried
//! request is about to create.

use crate::types::{ConfigFile, ServiceAttr, ServiceMember};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    pub skip_mtime: bool,
    pub skip_content: bool,
}

impl CompareOptions {
    pub const EXACT: Self = Self {
        skip_mtime: false,
        skip_content: false,
    };

    pub const SKIP_MTIME: Self = Self {
        skip_mtime: true,
        skip_content: false,
    };
}

pub fn equal_attr(a: &ServiceAttr, b: &ServiceAttr, opts: CompareOptions) -> bool {
    if opts.skip_mtime {
        a == &ServiceAttr {
            last_modified: a.last_modified,
            ..b.clone()
        }
    } else {
        a == b
    }
}

pub fn equal_member(a: &ServiceMember, b: &ServiceMember, opts: CompareOptions) -> bool {
    if opts.skip_mtime {
        a == &ServiceMember {
            last_modified: a.last_modified,
            ..b.clone()
        }
    } else {
        a == b
    }
}

pub fn equal_config_file(a: &ConfigFile, b: &ConfigFile, opts: CompareOptions) -> bool {
    a.service_uuid == b.service_uuid
        && a.file_id == b.file_id
        && a.file_md5 == b.file_md5
        && a.file_name == b.file_name
        && a.file_mode == b.file_mode
        && (opts.skip_mtime || a.last_modified == b.last_modified)
        && (opts.skip_content || a.content == b.content)
}
