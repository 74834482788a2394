//! End-to-end tests for the plugin runtime
//!
//! Boots a complete host (module registry, event bus, extension registry,
//! storage, dialogs), runs a calendar plugin and a task board plugin side by
//! side, and drives real cross-module traffic between them: dispatch fan-out,
//! format conversion over the live bus, conflict checks, and teardown.

use recado::config::RuntimeSettings;
use recado::extensions::{ExtensionOptions, ExtensionZone, FnComponent, UiNode};
use recado::interop::{self, EVENT_FORMAT_CALENDAR, EVENT_FORMAT_TASK};
use recado::modules::MethodMap;
use recado::plugins::{
    CoreApi, Plugin, PluginCandidate, PluginManager, PluginManifest, PluginState,
    EVENT_PLUGIN_ACTIVATED, PERM_STORAGE,
};
use recado::services::{MemoryStorage, NullDialogs, StorageService};
use recado::HostContext;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn calendar_and_task_plugins_interoperate() {
    let host = Arc::new(HostContext::new());
    let storage = Arc::new(MemoryStorage::new());
    let manager = boot(&host, Arc::clone(&storage));

    let calendar = Arc::new(CalendarPlugin::default());
    let board = Arc::new(TaskBoardPlugin::default());
    manager
        .register_candidate(PluginCandidate::new(
            PluginManifest::new("calendar", "Calendar", "1.2.0").with_permission(PERM_STORAGE),
            Arc::clone(&calendar),
        ))
        .unwrap();
    manager
        .register_candidate(PluginCandidate::new(
            PluginManifest::new("task-board", "Task Board", "0.3.1").with_requirement("calendar"),
            Arc::clone(&board),
        ))
        .unwrap();
    manager
        .register_candidate(PluginCandidate::new(
            PluginManifest::new("metrics", "Broken Metrics", "0.0.9"),
            Arc::new(SaboteurPlugin),
        ))
        .unwrap();
    assert_eq!(manager.activate_all().await, 3);

    // Create two overlapping events through the public module surface.
    let registry = host.modules();
    let api = registry.get("calendar").unwrap();
    let standup = json!({
        "id": "e1", "title": "Standup",
        "start": "2026-08-25T09:00:00Z", "end": "2026-08-25T09:30:00Z",
    });
    let retro = json!({
        "id": "e2", "title": "Retro",
        "start": "2026-08-25T09:15:00Z", "end": "2026-08-25T10:00:00Z",
    });
    api.invoke("createEvent", &[standup.clone()]).unwrap();
    api.invoke("createEvent", &[retro.clone()]).unwrap();

    // The task board converted each announcement as it arrived.
    {
        let mirrored = board.tasks.lock().unwrap();
        assert_eq!(mirrored.len(), 2);
        assert_eq!(mirrored[0]["due"], json!("2026-08-25T09:00:00Z"));
        assert_eq!(mirrored[0]["durationMinutes"], json!(30));
        assert_eq!(mirrored[1]["sourceFormat"], json!("calendar"));
    }

    // All three modules answer the fan-out in registration order; the
    // saboteur's failure is isolated into its own entry.
    let results = interop::execute_across_modules(Some(&registry), "getEvents", &[]);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].module, "calendar");
    assert!(results[0].success);
    assert_eq!(results[1].module, "tasks");
    assert!(results[1].success);
    assert_eq!(results[2].module, "metrics");
    assert!(!results[2].success);
    assert!(results[2].error.as_deref().unwrap().contains("offline"));

    assert!(interop::check_time_conflict(&standup, &retro));
    let check = interop::check_module_dependencies(
        Some(&registry),
        "task-board",
        Some(&["calendar".to_string()]),
    );
    assert!(check.success);

    // Retiring the calendar plugin sweeps its module and overlay but leaves
    // the task board running.
    manager.deactivate("calendar").await.unwrap();
    assert!(!registry.has("calendar"));
    assert_eq!(host.extensions().count(ExtensionZone::DayCellOverlay), 0);
    assert_eq!(manager.state("task-board"), Some(PluginState::Active));
    let results = interop::execute_across_modules(Some(&registry), "getEvents", &[]);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].module, "tasks");
    assert_eq!(results[1].module, "metrics");

    // Storage writes outlive the plugin.
    let marker = storage.get_item("calendar", "lastSync").await.unwrap();
    assert_eq!(marker, Some(json!("2026-08-25T08:00:00Z")));

    manager.shutdown().await;
    assert_eq!(manager.count_in_state(PluginState::Disabled), 3);
    assert!(host.events().event_types().is_empty());
}

#[tokio::test]
async fn settings_from_toml_silence_lifecycle_traffic() {
    let settings = RuntimeSettings::from_toml_str(
        "activation_timeout_secs = 5\nannounce_lifecycle_events = false\n",
    )
    .unwrap();

    let host = Arc::new(HostContext::new());
    let manager = PluginManager::new(
        Arc::clone(&host),
        Arc::new(MemoryStorage::new()),
        Arc::new(NullDialogs),
        "1.0.0",
        settings,
    )
    .unwrap();

    let announcements = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&announcements);
    host.events()
        .subscribe("observer", EVENT_PLUGIN_ACTIVATED, move |_payload| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    manager
        .register_candidate(PluginCandidate::new(
            PluginManifest::new("calendar", "Calendar", "1.2.0"),
            Arc::new(CalendarPlugin::default()),
        ))
        .unwrap();
    assert_eq!(manager.activate_all().await, 1);
    assert_eq!(announcements.load(Ordering::SeqCst), 0);
}

fn boot(host: &Arc<HostContext>, storage: Arc<MemoryStorage>) -> PluginManager {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    PluginManager::new(
        Arc::clone(host),
        storage,
        Arc::new(NullDialogs),
        "1.0.0",
        RuntimeSettings::default(),
    )
    .unwrap()
}

/// Keeps events in memory, announces each new one on the bus, and stamps a
/// sync marker into its storage namespace when it has the permission
#[derive(Default)]
struct CalendarPlugin {
    events: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Plugin for CalendarPlugin {
    async fn init(&self, core: CoreApi) -> anyhow::Result<()> {
        let reader = Arc::clone(&self.events);
        let writer = Arc::clone(&self.events);
        let announcer = core.clone();

        core.modules().register(
            "calendar",
            Arc::new(
                MethodMap::new()
                    .with_method("getEvents", move |_args| {
                        Ok(Value::Array(reader.lock().unwrap().clone()))
                    })
                    .with_method("createEvent", move |args| {
                        let event = args.first().cloned().ok_or_else(|| {
                            anyhow::anyhow!("createEvent expects an event payload")
                        })?;
                        writer.lock().unwrap().push(event.clone());
                        announcer.events().publish("calendar:event-created", &event);
                        Ok(event)
                    }),
            ),
        );

        core.extensions().register(
            ExtensionZone::DayCellOverlay,
            Arc::new(FnComponent::new(|_props| UiNode::new("calendar-dot"))),
            ExtensionOptions::default(),
        );

        // Best effort: without the storage grant this is denied, which is fine.
        let _ = core.storage().set("lastSync", json!("2026-08-25T08:00:00Z")).await;
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Activates cleanly but contributes a module whose only method always fails
struct SaboteurPlugin;

#[async_trait]
impl Plugin for SaboteurPlugin {
    async fn init(&self, core: CoreApi) -> anyhow::Result<()> {
        core.modules().register(
            "metrics",
            Arc::new(MethodMap::new().with_method("getEvents", |_args| {
                anyhow::bail!("metrics backend offline")
            })),
        );
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Mirrors calendar announcements into a task list via format conversion
#[derive(Default)]
struct TaskBoardPlugin {
    tasks: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Plugin for TaskBoardPlugin {
    async fn init(&self, core: CoreApi) -> anyhow::Result<()> {
        let inbox = Arc::clone(&self.tasks);
        core.events().subscribe("calendar:event-created", move |event| {
            if let Some(task) =
                interop::convert_event_format(event, EVENT_FORMAT_CALENDAR, EVENT_FORMAT_TASK)
            {
                inbox.lock().unwrap().push(task);
            }
            Ok(())
        });

        let listing = Arc::clone(&self.tasks);
        core.modules().register(
            "tasks",
            Arc::new(MethodMap::new().with_method("getEvents", move |_args| {
                Ok(Value::Array(listing.lock().unwrap().clone()))
            })),
        );

        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
