use std::path::{Path, PathBuf};

pub const OUTBOUND_QUEUE_FILE_NAME: &str = "outbound.json";

pub fn outbound_queue_path(state_root: &Path) -> PathBuf {
    state_root.join("queue").join(OUTBOUND_QUEUE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_queue_lives_under_queue_dir() {
        assert_eq!(
            outbound_queue_path(Path::new("/tmp/.switchyard")),
            PathBuf::from("/tmp/.switchyard/queue/outbound.json")
        );
    }
}
