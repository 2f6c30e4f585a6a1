//! Stable instance identity.

use std::io::Write;
use std::path::Path;

use godfs_types::InstanceId;
use snafu::ResultExt;
use tracing::info;

use crate::error::IdentityInvalidSnafu;
use crate::error::IdentityIoSnafu;
use crate::error::NodeError;

/// Name of the id file inside the data directory.
pub const INSTANCE_ID_FILE_NAME: &str = "instance.id";

/// Read this node's id from `data_dir`, generating and persisting one at
/// first boot.
pub fn load_or_create_instance_id(data_dir: &Path) -> Result<InstanceId, NodeError> {
    let path = data_dir.join(INSTANCE_ID_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(content) => InstanceId::parse(content.trim()).context(IdentityInvalidSnafu { path: &path }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = InstanceId::generate();
            let tmp = data_dir.join(format!("{INSTANCE_ID_FILE_NAME}.tmp"));
            let mut file = std::fs::File::create(&tmp).context(IdentityIoSnafu { path: &tmp })?;
            file.write_all(id.as_str().as_bytes()).context(IdentityIoSnafu { path: &tmp })?;
            file.sync_all().context(IdentityIoSnafu { path: &tmp })?;
            std::fs::rename(&tmp, &path).context(IdentityIoSnafu { path: &path })?;
            info!(instance_id = %id, path = %path.display(), "generated instance id");
            Ok(id)
        }
        Err(source) => Err(NodeError::IdentityIo { path, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable_across_boots() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_instance_id(dir.path()).unwrap();
        let second = load_or_create_instance_id(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(dir.path().join(INSTANCE_ID_FILE_NAME)).unwrap(), first.as_str());
    }

    #[test]
    fn test_garbage_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INSTANCE_ID_FILE_NAME), "not-an-id!").unwrap();
        assert!(matches!(load_or_create_instance_id(dir.path()), Err(NodeError::IdentityInvalid { .. })));
    }
}
