#![forbid(unsafe_code)]

mod common;

use std::sync::Arc;

use common::{ctx, dashboard, ScriptedAdapter};
use dualwrite::core::prelude::*;
use dualwrite::{Mode, ModeConfig};

#[tokio::test]
async fn config_builds_writers_per_resource() {
    let mut cfg = ModeConfig::from_yaml_str("default: 1\nresources:\n  dashboards: 3\n").unwrap();
    cfg.apply_env(vec![("DUALWRITE_MODE_FOLDERS".to_string(), "4".to_string())]).unwrap();

    let source = Arc::new(ScriptedAdapter::new());
    let target = Arc::new(ScriptedAdapter::new());

    let dashboards = cfg.writer("dashboards", source.clone(), target.clone());
    assert_eq!(dashboards.mode(), Mode::Three);
    assert_eq!(dashboards.resource(), "dashboards");
    dashboards.create(&ctx(), dashboard("cpu"), None, &CreateOptions::default()).await.unwrap();
    assert_eq!(target.calls(Operation::Create), 1);
    assert_eq!(source.calls(Operation::Create), 1);

    let folders = cfg.writer("folders", source.clone(), target.clone());
    assert_eq!(folders.mode(), Mode::Four);

    let playlists = cfg.writer("playlists", source.clone(), target);
    assert_eq!(playlists.mode(), Mode::One);
    playlists.list(&ctx(), &ListOptions::default()).await.unwrap();
    assert_eq!(source.calls(Operation::List), 1);
}
