use std::path::Path;

use chrono::Utc;

use dispatch_common::config::PathsConfig;
use dispatch_common::ids::TaskId;
use dispatch_common::types::{DockingParams, Task, TaskStatus};
use dispatch_common::DispatchError;

use crate::store::StoreClient;

/// Create a task from an on-disk archive: a directory (or `.zip`) holding
/// `receptor.pdbqt`, a `ligands/` directory of one file per ligand, and a
/// `docking_params.json` of shared docking parameters. Copies the receptor
/// into `paths.tasks_dir/<task_id>/receptor.pdbqt`, creates one pending
/// work item per ligand file found, and inserts the task row.
pub async fn create_task_from_archive(
    store: &StoreClient,
    paths: &PathsConfig,
    task_id: &str,
    source: &Path,
) -> Result<(), DispatchError> {
    let task_id = TaskId::parse(task_id)?;

    let staging = if source.extension().is_some_and(|e| e == "zip") {
        let dest = Path::new(&paths.tasks_dir).join(format!("{task_id}-staging"));
        extract_zip(source, &dest)?;
        dest
    } else {
        source.to_path_buf()
    };

    let receptor_src = staging.join("receptor.pdbqt");
    if !receptor_src.exists() {
        return Err(DispatchError::Validation(
            "archive is missing receptor.pdbqt".into(),
        ));
    }

    let ligands_dir = staging.join("ligands");
    let ligands = list_ligand_files(&ligands_dir)?;
    if ligands.is_empty() {
        return Err(DispatchError::Validation(
            "archive contains no ligand files".into(),
        ));
    }

    let docking_params_raw = std::fs::read_to_string(staging.join("docking_params.json"))
        .map_err(|e| DispatchError::Validation(format!("missing docking_params.json: {e}")))?;
    let docking_params: DockingParams = serde_json::from_str(&docking_params_raw)
        .map_err(|e| DispatchError::Validation(format!("invalid docking_params.json: {e}")))?;

    let task_dir = Path::new(&paths.tasks_dir).join(task_id.as_str());
    std::fs::create_dir_all(&task_dir)
        .map_err(|e| DispatchError::Filesystem(format!("creating task directory: {e}")))?;
    let receptor_dest = task_dir.join("receptor.pdbqt");
    std::fs::copy(&receptor_src, &receptor_dest)
        .map_err(|e| DispatchError::Filesystem(format!("copying receptor: {e}")))?;

    let task = Task {
        id: task_id.clone(),
        receptor_path: receptor_dest.display().to_string(),
        docking_params,
        status: TaskStatus::Pending,
        total_ligands: ligands.len() as i64,
        created_at: Utc::now(),
    };

    store.create_task(&task).await?;
    store.create_work_items(&task_id, &ligands).await?;

    if staging != source {
        let _ = std::fs::remove_dir_all(&staging);
    }

    Ok(())
}

/// List ligand files as `(ligand_id, ligand_file)` pairs: the id is the
/// filename stem (the unique key), the file is the full original filename
/// served back to the compute node for download.
fn list_ligand_files(ligands_dir: &Path) -> Result<Vec<(String, String)>, DispatchError> {
    let mut ligands = Vec::new();
    let entries = std::fs::read_dir(ligands_dir)
        .map_err(|e| DispatchError::Filesystem(format!("reading ligands directory: {e}")))?;

    for entry in entries {
        let entry = entry.map_err(|e| DispatchError::Filesystem(e.to_string()))?;
        if entry.path().is_file() {
            if let (Some(stem), Some(file_name)) = (
                entry.path().file_stem().and_then(|s| s.to_str()),
                entry.path().file_name().and_then(|s| s.to_str()),
            ) {
                ligands.push((stem.to_string(), file_name.to_string()));
            }
        }
    }
    ligands.sort();
    Ok(ligands)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), DispatchError> {
    let file = std::fs::File::open(archive)
        .map_err(|e| DispatchError::Filesystem(format!("opening archive: {e}")))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| DispatchError::Validation(format!("invalid zip archive: {e}")))?;
    zip.extract(dest)
        .map_err(|e| DispatchError::Filesystem(format!("extracting archive: {e}")))?;
    Ok(())
}

/// Delete a task's store rows and its filesystem directories.
pub async fn delete_task(
    store: &StoreClient,
    paths: &PathsConfig,
    task_id: &str,
) -> Result<(), DispatchError> {
    let task_id = TaskId::parse(task_id)?;
    store.delete_task(&task_id).await?;

    let _ = std::fs::remove_dir_all(Path::new(&paths.tasks_dir).join(task_id.as_str()));
    let _ = std::fs::remove_dir_all(Path::new(&paths.results_dir).join(task_id.as_str()));

    Ok(())
}

pub async fn pause_task(store: &StoreClient, task_id: &str) -> Result<(), DispatchError> {
    let task_id = TaskId::parse(task_id)?;
    store.pause_task(&task_id).await?;
    Ok(())
}

pub async fn resume_task(store: &StoreClient, task_id: &str) -> Result<(), DispatchError> {
    let task_id = TaskId::parse(task_id)?;
    store.resume_task(&task_id).await?;
    Ok(())
}

pub async fn set_password(store: &StoreClient, new_password: &str) -> Result<(), DispatchError> {
    let hash = crate::auth::hash_password(new_password)?;
    store.set_password_hash(&hash).await?;
    Ok(())
}

pub async fn reset_heartbeats(store: &StoreClient) -> Result<u64, DispatchError> {
    Ok(store.reset_heartbeats().await?)
}

pub async fn reset_processing_to_pending(store: &StoreClient) -> Result<u64, DispatchError> {
    Ok(store.reset_all_processing_to_pending().await?)
}

pub async fn reset_failed_to_pending(store: &StoreClient) -> Result<u64, DispatchError> {
    Ok(store.reset_all_failed_to_pending().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (StoreClient, tempfile::TempDir, PathsConfig) {
        let db_dir = tempfile::tempdir().unwrap();
        let store = StoreClient::connect(db_dir.path().join("admin_test.sqlite").to_str().unwrap())
            .await
            .unwrap();
        store.migrate().await.unwrap();
        std::mem::forget(db_dir);

        let root = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            tasks_dir: root.path().join("tasks").to_string_lossy().to_string(),
            results_dir: root.path().join("results").to_string_lossy().to_string(),
        };
        (store, root, paths)
    }

    fn write_source_dir(root: &Path) {
        let ligands = root.join("ligands");
        std::fs::create_dir_all(&ligands).unwrap();
        std::fs::write(root.join("receptor.pdbqt"), b"RECEPTOR").unwrap();
        std::fs::write(ligands.join("lig1.pdbqt"), b"LIGAND ONE").unwrap();
        std::fs::write(ligands.join("lig2.pdbqt"), b"LIGAND TWO").unwrap();
        std::fs::write(
            root.join("docking_params.json"),
            br#"{"center_x":1.0,"center_y":2.0,"center_z":3.0,"size_x":20.0,"size_y":20.0,"size_z":20.0,"num_modes":9,"energy_range":3.0,"cpu":4}"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn creates_task_from_plain_directory() {
        let (store, root, paths) = setup().await;
        let source = root.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        write_source_dir(&source);

        create_task_from_archive(&store, &paths, "task-x", &source)
            .await
            .unwrap();

        let task = store.get_task(&TaskId::parse("task-x").unwrap()).await.unwrap();
        assert_eq!(task.total_ligands, 2);
        assert!(Path::new(&task.receptor_path).exists());
    }

    #[tokio::test]
    async fn rejects_archive_missing_receptor() {
        let (store, root, paths) = setup().await;
        let source = root.path().join("source");
        std::fs::create_dir_all(source.join("ligands")).unwrap();
        std::fs::write(source.join("ligands").join("lig1.pdbqt"), b"x").unwrap();

        let err = create_task_from_archive(&store, &paths, "task-y", &source)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_archive_with_no_ligands() {
        let (store, root, paths) = setup().await;
        let source = root.path().join("source");
        std::fs::create_dir_all(source.join("ligands")).unwrap();
        std::fs::write(source.join("receptor.pdbqt"), b"RECEPTOR").unwrap();

        let err = create_task_from_archive(&store, &paths, "task-z", &source)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_task_removes_row_and_directories() {
        let (store, root, paths) = setup().await;
        let source = root.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        write_source_dir(&source);
        create_task_from_archive(&store, &paths, "task-d", &source)
            .await
            .unwrap();

        delete_task(&store, &paths, "task-d").await.unwrap();

        assert!(store.get_task(&TaskId::parse("task-d").unwrap()).await.is_err());
        assert!(!Path::new(&paths.tasks_dir).join("task-d").exists());
    }

    #[tokio::test]
    async fn set_password_then_verify_succeeds() {
        let (store, _root, _paths) = setup().await;
        set_password(&store, "correct horse battery staple").await.unwrap();

        assert!(crate::auth::verify_password(&store, "correct horse battery staple")
            .await
            .unwrap());
        assert!(!crate::auth::verify_password(&store, "wrong").await.unwrap());
    }
}
