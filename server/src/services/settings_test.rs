use super::*;
use std::time::Duration;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings(&dir.path().join("absent.json"));
    assert_eq!(settings.backdrop, Settings::default().backdrop);
}

#[test]
fn corrupt_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").expect("write");

    assert!(matches!(read_settings(&path), Err(SettingsError::Json(_))));
    assert_eq!(load_settings(&path).cover, Settings::default().cover);
}

#[test]
fn unknown_keys_survive_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r##"{"__internal":{"id":"rev-1"},"backdrop":{"color":"#ff0000ff"},"language":"de"}"##,
    )
    .expect("write");

    let settings = load_settings(&path);
    assert_eq!(settings.revision(), "rev-1");
    assert_eq!(settings.backdrop.color, "#ff0000ff");
    assert_eq!(settings.extra.get("language").and_then(|v| v.as_str()), Some("de"));
}

#[tokio::test]
async fn write_creates_parent_dirs_and_leaves_no_temp_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("settings.json");
    let settings = Settings::default();

    write_settings(&path, &settings).await.expect("write");

    assert_eq!(read_settings(&path).expect("read back"), settings);
    assert!(!temp_path(&path).exists());
}

async fn await_writer(handle: JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("writer should finish")
        .expect("writer task should not panic");
}

fn colored(color: &str) -> Settings {
    let mut settings = Settings::default();
    settings.backdrop.color = color.into();
    settings.regenerate_revision();
    settings
}

#[tokio::test]
async fn burst_of_saves_persists_newest_revision() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    let (mut writer, task) = spawn_settings_writer(path.clone(), Settings::default());

    let older = colored("#000000ff");
    let newest = colored("#00ff00ff");
    writer.save(&older);
    writer.save(&newest);
    drop(writer);
    await_writer(task.handle).await;

    let stored = read_settings(&path).expect("read back");
    assert_eq!(stored.revision(), newest.revision());
    assert_eq!(stored.backdrop.color, "#00ff00ff");
}

#[tokio::test]
async fn every_save_after_a_write_is_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    let (mut writer, task) = spawn_settings_writer(path.clone(), Settings::default());

    let first = colored("#111111ff");
    writer.save(&first);
    tokio::time::timeout(Duration::from_secs(2), async {
        while read_settings(&path).map(|s| s.revision().to_owned()).ok().as_deref() != Some(first.revision()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first record should land");

    let second = colored("#222222ff");
    writer.save(&second);
    drop(writer);
    await_writer(task.handle).await;

    assert_eq!(read_settings(&path).expect("read back").revision(), second.revision());
}

#[tokio::test]
async fn finish_flushes_pending_record_while_writers_remain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    let (mut writer, task) = spawn_settings_writer(path.clone(), Settings::default());

    let pending = colored("#abcdefff");
    writer.save(&pending);
    // A live clone keeps the channel open, as connection tasks do at shutdown.
    let _still_open = writer.clone();
    task.finish(Duration::from_secs(2)).await;

    assert_eq!(read_settings(&path).expect("read back").revision(), pending.revision());
}

#[tokio::test]
async fn unchanged_seed_is_not_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    let (writer, task) = spawn_settings_writer(path.clone(), Settings::default());
    let _still_open = writer.clone();

    task.finish(Duration::from_secs(2)).await;

    assert!(!path.exists());
}
