use std::path::PathBuf;
use std::sync::Arc;

use super::HistoryRuntime;
use super::history_db_path;
use crate::RedirectTarget;
use crate::testing::unique_temp_dir;

pub(super) async fn init_runtime() -> (Arc<HistoryRuntime>, PathBuf) {
    let home = unique_temp_dir();
    let runtime = HistoryRuntime::init(history_db_path(&home), Default::default())
        .await
        .expect("initialize history runtime");
    (runtime, home)
}

pub(super) fn target(page_id: i64, title: &str) -> RedirectTarget {
    RedirectTarget {
        page_id,
        namespace: 0,
        title: title.to_string(),
    }
}
