use capsule_core::{CoreError, CreateOptions, Orchestrator, RestoreFailure, RestoreStep};
use capsule_runtime::tools::sha256_cmd;
use capsule_runtime::{ContainerEngine, ContainerState, ExecOutput, MockEngine};
use capsule_schema::{EnvironmentDescriptor, GlobalConfig, PluginRef};
use capsule_store::{EnvStatus, StoreError};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

const IMAGE: &str = "example/app:1.0";
const NODE_URL: &str = "https://example.com/acme/node-pack.git";
const OLD_COMMIT: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const PINNED: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn setup(root: &Path) -> (Arc<MockEngine>, Orchestrator) {
    let engine = Arc::new(MockEngine::new());
    let config = GlobalConfig {
        default_base_image: IMAGE.to_owned(),
        ..GlobalConfig::default()
    };
    let orch = Orchestrator::with_engine(root, config, engine.clone()).unwrap();
    (engine, orch)
}

/// Populate a running container with packages, one versioned and one local
/// plugin, three models, and a single workflow.
fn populate(engine: &MockEngine, container: &str) {
    engine.set_packages(container, &["numpy==1.26.4", "torch==2.1.0", "safetensors==0.4.2"]);
    engine.register_remote(NODE_URL, &[OLD_COMMIT, PINNED]);
    engine.add_repo(container, "/comfyui/custom_nodes/node-pack", NODE_URL, PINNED);
    engine.add_dir(container, "/comfyui/custom_nodes/local-tweaks");
    engine.add_file(container, "/comfyui/models/checkpoints/m1.safetensors", b"one");
    engine.add_file(container, "/comfyui/models/checkpoints/m2.safetensors", b"two");
    engine.add_file(container, "/comfyui/models/loras/m3.safetensors", b"three");
    engine.add_file(container, "/comfyui/workflows/main.json", b"{}");
}

#[test]
fn create_activate_pack_delete_scenario() {
    let store = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());

    let record = orch.create(&CreateOptions::new("envA")).unwrap();
    let listed = orch.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, EnvStatus::Exited);

    let activation = orch.activate("envA").unwrap();
    assert_eq!(activation.record.status, EnvStatus::Running);
    assert_eq!(
        engine.container_state(&record.container_name).unwrap(),
        ContainerState::Running
    );

    populate(&engine, &record.container_name);
    let packed = orch.pack("envA", None, None).unwrap();
    assert_eq!(packed.path, orch.layout().descriptor_path(&record.id));
    let on_disk = EnvironmentDescriptor::read_from_file(&packed.path).unwrap();
    assert_eq!(on_disk.base_image, record.image);
    assert_eq!(
        on_disk.dependencies,
        vec!["numpy==1.26.4", "torch==2.1.0", "safetensors==0.4.2"]
    );
    assert_eq!(on_disk.workflow_file, "main.json");
    assert_eq!(packed.digest, on_disk.digest().unwrap());

    orch.delete("envA").unwrap();
    assert!(orch.list().unwrap().is_empty());
    assert_eq!(
        engine.container_state(&record.container_name).unwrap(),
        ContainerState::Absent
    );
    assert!(!orch.layout().project_dir(&record.id).exists());
}

#[test]
fn capture_then_restore_converges() {
    let store = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());

    let a = orch.create(&CreateOptions::new("envA")).unwrap();
    orch.activate("envA").unwrap();
    populate(&engine, &a.container_name);
    let snapshot = out_dir.path().join("envA.toml");
    let packed = orch.pack("envA", None, Some(snapshot.as_path())).unwrap();
    let before = std::fs::read(&snapshot).unwrap();
    orch.delete("envA").unwrap();

    let b = orch.create(&CreateOptions::new("envB")).unwrap();
    let outcome = orch.restore("envB", Some(snapshot.as_path())).unwrap();
    assert!(outcome.report.is_complete(), "{:?}", outcome.report.failures);
    assert_eq!(outcome.record.status, EnvStatus::Running);

    let d = &packed.descriptor;
    assert_eq!(engine.installed_packages(&b.container_name), d.dependencies);
    for plugin in d.plugins.iter().filter(|p| p.is_versioned()) {
        let repo = engine
            .repo(&b.container_name, &format!("/comfyui/custom_nodes/{}", plugin.name))
            .unwrap();
        assert_eq!(Some(repo.head.as_str()), plugin.pinned_commit());
        assert_eq!(repo.url, plugin.repo_url);
    }
    assert_eq!(outcome.report.plugins_restored, vec!["node-pack"]);
    // The source descriptor is never touched by restore.
    assert_eq!(std::fs::read(&snapshot).unwrap(), before);
}

#[test]
fn ambiguous_workflows_write_nothing() {
    let store = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());
    let record = orch.create(&CreateOptions::new("envA")).unwrap();
    orch.activate("envA").unwrap();
    engine.add_file(&record.container_name, "/comfyui/workflows/b.json", b"{}");
    engine.add_file(&record.container_name, "/comfyui/workflows/a.json", b"{}");
    engine.add_file(&record.container_name, "/comfyui/models/loras/m1", b"m1");

    let out = out_dir.path().join("capsule.toml");
    match orch.pack("envA", None, Some(out.as_path())) {
        Err(CoreError::AmbiguousWorkflow { candidates }) => {
            assert_eq!(candidates, vec!["a.json", "b.json"]);
        }
        other => panic!("expected AmbiguousWorkflow, got {other:?}"),
    }
    assert!(!out.exists());
    assert!(!engine
        .exec_log()
        .iter()
        .any(|(_, argv)| argv.first().is_some_and(|p| p == "sha256sum")));

    let packed = orch.pack("envA", Some("b.json"), Some(out.as_path())).unwrap();
    assert_eq!(packed.descriptor.workflow_file, "b.json");
}

#[test]
fn one_failed_model_hash_is_omitted() {
    let store = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());
    let record = orch.create(&CreateOptions::new("envA")).unwrap();
    orch.activate("envA").unwrap();
    populate(&engine, &record.container_name);
    engine.script(
        &sha256_cmd("/comfyui/models/checkpoints/m2.safetensors"),
        ExecOutput::failed(1, "sha256sum: read error: Input/output error"),
    );

    let packed = orch.pack("envA", None, None).unwrap();
    let names: Vec<&str> = packed
        .descriptor
        .models
        .iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(names, vec!["m1.safetensors", "m3.safetensors"]);
    let categories: Vec<&str> = packed
        .descriptor
        .models
        .iter()
        .map(|m| m.category.as_str())
        .collect();
    assert_eq!(categories, vec!["checkpoints", "loras"]);
    assert!(packed
        .descriptor
        .models
        .iter()
        .all(|m| m.content_hash.algorithm() == Some("sha256")));
}

#[test]
fn pack_requires_running_container() {
    let store = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());
    orch.create(&CreateOptions::new("envA")).unwrap();
    orch.activate("envA").unwrap();
    orch.deactivate("envA").unwrap();

    assert!(matches!(
        orch.pack("envA", None, None),
        Err(CoreError::NotRunning { .. })
    ));
    assert!(engine.exec_log().is_empty());
}

#[test]
fn restore_skips_unversioned_plugin() {
    let store = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());
    let record = orch.create(&CreateOptions::new("envA")).unwrap();

    let mut d = EnvironmentDescriptor::new("envA", IMAGE);
    d.plugins = vec![PluginRef::unversioned("local-tweaks")];
    d.write_to_file(orch.layout().descriptor_path(&record.id))
        .unwrap();

    let outcome = orch.restore("envA", None).unwrap();
    assert!(outcome.report.is_complete());
    assert!(outcome.report.plugins_restored.is_empty());
    assert!(!engine
        .exec_log()
        .iter()
        .any(|(_, argv)| argv.first().is_some_and(|p| p == "git")));
}

#[test]
fn restore_reports_every_failure() {
    let store = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());
    let record = orch.create(&CreateOptions::new("envA")).unwrap();
    engine.register_remote(NODE_URL, &[OLD_COMMIT]);

    let mut d = EnvironmentDescriptor::new("envA", IMAGE);
    d.dependencies = vec!["torch==2.1.0".to_owned()];
    d.plugins = vec![
        PluginRef::versioned("node-pack", NODE_URL, PINNED),
        PluginRef::versioned("gone", "https://example.com/gone.git", PINNED),
    ];
    d.write_to_file(orch.layout().descriptor_path(&record.id))
        .unwrap();

    let outcome = orch.restore("envA", None).unwrap();
    let failed: Vec<&str> = outcome
        .report
        .failures
        .iter()
        .filter_map(|f| match f {
            RestoreFailure::PluginRestore { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec!["node-pack", "gone"]);
    // Later steps still ran.
    assert_eq!(engine.installed_packages(&record.container_name), vec!["torch==2.1.0"]);
    assert!(outcome.report.completed.contains(&RestoreStep::UpdateStatus));
    assert_eq!(outcome.record.status, EnvStatus::Running);
}

#[test]
fn interrupted_restore_leaves_state_as_is() {
    let store = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());
    let record = orch.create(&CreateOptions::new("envA")).unwrap();

    let outcome = orch
        .restore_with_cancel("envA", None, &|| true)
        .unwrap();
    assert_eq!(outcome.report.skipped, RestoreStep::ALL.to_vec());
    assert!(outcome.report.completed.is_empty());
    assert_eq!(outcome.record.status, EnvStatus::Exited);
    assert_eq!(
        engine.container_state(&record.container_name).unwrap(),
        ContainerState::Absent
    );
}

#[test]
fn activate_twice_creates_one_container() {
    let store = tempfile::tempdir().unwrap();
    let (engine, orch) = setup(store.path());
    let record = orch.create(&CreateOptions::new("envA")).unwrap();
    orch.activate("envA").unwrap();
    orch.activate("envA").unwrap();
    assert_eq!(engine.create_count(&record.container_name), 1);
    assert_eq!(
        engine.container_state(&record.container_name).unwrap(),
        ContainerState::Running
    );
}

#[test]
fn lookup_by_id_or_name() {
    let store = tempfile::tempdir().unwrap();
    let (_engine, orch) = setup(store.path());
    let record = orch.create(&CreateOptions::new("envA")).unwrap();
    assert_eq!(orch.find(&record.id).unwrap().name, "envA");
    assert_eq!(orch.find("envA").unwrap().id, record.id);
    assert!(matches!(
        orch.find("nope"),
        Err(CoreError::Store(StoreError::NotFound(_)))
    ));
}

#[test]
fn corrupt_registry_is_reported() {
    let store = tempfile::tempdir().unwrap();
    let (_engine, orch) = setup(store.path());
    std::fs::write(orch.layout().registry_file(), "{ not json").unwrap();
    assert!(matches!(
        orch.list(),
        Err(CoreError::Store(StoreError::Corrupt { .. }))
    ));
}

#[test]
fn concurrent_creates_are_not_lost() {
    let store = tempfile::tempdir().unwrap();
    let root = store.path().to_path_buf();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let root = root.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let (_engine, orch) = setup(&root);
                barrier.wait();
                orch.create(&CreateOptions::new(format!("env{i}"))).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let (_engine, orch) = setup(&root);
    let mut names: Vec<String> = orch.list().unwrap().into_iter().map(|r| r.name).collect();
    names.sort();
    let mut expected: Vec<String> = (0..threads).map(|i| format!("env{i}")).collect();
    expected.sort();
    assert_eq!(names, expected);
}
