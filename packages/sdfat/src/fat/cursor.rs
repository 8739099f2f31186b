use heapless::String;

use crate::{NAME_MAX, PATH_MAX};

use super::volume::Volume;

/// Current-directory handle for the cd / ls / cat operations. A value type:
/// callers own it and pass it explicitly; only a successful
/// [`change_dir`](super::change_dir) mutates it.
///
/// Parent paths keep their trailing slash (`"/A/"` for a directory under
/// `/A`); the root's parent paths are empty and its names are `"/"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirCursor {
    pub first_cluster: u32,
    pub short_name: String<12>,
    pub long_name: String<NAME_MAX>,
    pub short_parent_path: String<PATH_MAX>,
    pub long_parent_path: String<PATH_MAX>,
}

impl DirCursor {
    /// Cursor at the volume's root directory.
    pub fn root(vol: &Volume) -> Self {
        let mut short_name = String::new();
        let _ = short_name.push('/');
        let mut long_name = String::new();
        let _ = long_name.push('/');
        Self {
            first_cluster: vol.root_cluster,
            short_name,
            long_name,
            short_parent_path: String::new(),
            long_parent_path: String::new(),
        }
    }

    pub fn is_root(&self, vol: &Volume) -> bool {
        self.first_cluster == vol.root_cluster
    }

    pub(crate) fn reset_to_root(&mut self, vol: &Volume) {
        *self = Self::root(vol);
    }
}
