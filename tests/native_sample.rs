// Integration tests against the real sample addon library
//
// The sample cdylib is built once into its own target directory and then
// driven through the libloading backed loader, so the C tables, host
// callbacks and setter marshalling all run for real.

use std::collections::BTreeMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use addonhost::addon::{
    AddonDescriptor,
    AddonHost,
    AddonSettings,
    AddonStatus,
    HostServices,
    InstanceData,
    InstanceType,
    LifecycleState,
    MemoryCatalog,
    MemorySettings,
    MessageKind,
    Notifier,
    SearchPaths,
    SettingDefinition,
    SettingsCategory,
    SettingsProvider,
    UserMessage,
};

#[derive(Default)]
struct Messages(Mutex<Vec<UserMessage>>);

impl Notifier for Messages {
    fn notify(&self, message: UserMessage) {
        self.0.lock().push(message);
    }
}

impl Messages {
    fn kinds(&self) -> Vec<MessageKind> {
        self.0.lock().iter().map(|m| m.kind).collect()
    }
}

fn sample_library() -> &'static Path {
    static LIBRARY: OnceLock<PathBuf> = OnceLock::new();
    LIBRARY.get_or_init(|| {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        let target = root.join("target").join("sample-addon");
        let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());

        let status = Command::new(cargo)
            .current_dir(root)
            .args(["build", "-p", "addonhost-sample", "--target-dir"])
            .arg(&target)
            .status()
            .expect("run cargo for the sample addon");
        assert!(status.success(), "building addonhost-sample failed");

        let library = target
            .join("debug")
            .join(format!("{}addonhost_sample{}", DLL_PREFIX, DLL_SUFFIX));
        assert!(library.exists(), "{} missing", library.display());
        library
    })
}

struct Fixture {
    tmp: tempfile::TempDir,
    catalog: Arc<MemoryCatalog>,
    settings: Arc<MemorySettings>,
    messages: Arc<Messages>,
    host: AddonHost,
    descriptor: Arc<AddonDescriptor>,
}

fn fixture(values: &[(&str, &str)], settings: Vec<SettingDefinition>) -> Fixture {
    let library = sample_library();
    let tmp = tempfile::tempdir().unwrap();

    let descriptor = AddonDescriptor::new(
        "audiodecoder.sample",
        library.file_name().unwrap().to_string_lossy(),
    )
    .with_name("Sample Tone Decoder")
    .with_author("Stuart Hunter")
    .with_path(library.parent().unwrap())
    .with_profile_path(tmp.path().join("userdata"))
    .with_provides(&[InstanceType::AudioDecoder]);

    let store = Arc::new(MemorySettings::from_yaml_file(&tmp.path().join("settings.yaml")).unwrap());
    store.insert(
        &descriptor.id,
        AddonSettings {
            categories: vec![SettingsCategory {
                label: "Tone".into(),
                settings,
            }],
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        },
    );

    let catalog = Arc::new(MemoryCatalog::new());
    let messages = Arc::new(Messages::default());
    let services = HostServices::new(SearchPaths {
        fallback_roots: Vec::new(),
        extra_library_dir: None,
        staging_dir: tmp.path().join("staging"),
    })
    .with_catalog(catalog.clone())
    .with_settings(store.clone())
    .with_notifier(messages.clone());

    Fixture {
        tmp,
        catalog,
        settings: store,
        messages,
        host: AddonHost::new(services),
        descriptor: Arc::new(descriptor),
    }
}

#[test]
fn sample_addon_full_lifecycle() {
    let fx = fixture(
        &[("tone.frequency", "1000"), ("restart.device", "true")],
        vec![
            SettingDefinition::new("tone.frequency", "integer"),
            SettingDefinition::new("restart.device", "bool"),
        ],
    );
    let id = fx.descriptor.id.clone();
    let rt = fx.host.runtime(Arc::clone(&fx.descriptor));

    assert_eq!(
        rt.create_instance(InstanceType::AudioDecoder, "tone-1", InstanceData::null()),
        AddonStatus::Ok
    );
    assert_eq!(rt.state(), LifecycleState::Initialized);
    assert_eq!(rt.instance_type("tone-1"), Some(InstanceType::AudioDecoder));
    assert_eq!(rt.get_status(), Ok(AddonStatus::Ok));

    rt.destroy_instance("tone-1");
    assert_eq!(rt.state(), LifecycleState::Unloaded);

    // restart notice from the transfer at create, nothing else
    assert_eq!(fx.messages.kinds(), vec![MessageKind::SettingsOutcome]);

    // saved settings came back through the C buffers and were persisted
    assert_eq!(fx.settings.value(&id, "tone.frequency").as_deref(), Some("1000"));
    assert_eq!(fx.settings.value(&id, "tone.waveform").as_deref(), Some("sine"));
    assert_eq!(fx.settings.value(&id, "restart.device").as_deref(), Some("true"));

    let reloaded = MemorySettings::from_yaml_file(&fx.tmp.path().join("settings.yaml")).unwrap();
    assert_eq!(reloaded.value(&id, "tone.waveform").as_deref(), Some("sine"));
    assert!(!fx.catalog.is_disabled(&id));
}

#[test]
fn sample_addon_panic_is_contained() {
    let fx = fixture(
        &[("debug.panic", "true")],
        vec![SettingDefinition::new("debug.panic", "bool")],
    );
    let id = fx.descriptor.id.clone();

    // a private copy keeps this test's addon state apart from the others
    let child = fx.host.spawn_child(Arc::clone(&fx.descriptor));
    assert_eq!(child.create(InstanceType::AudioDecoder), AddonStatus::PermanentFailure);

    assert_eq!(child.state(), LifecycleState::Unloaded);
    assert!(fx.catalog.is_disabled(&id));
    assert_eq!(fx.messages.kinds(), vec![MessageKind::AddonFault]);
    assert!(fx.messages.0.lock()[0].body.contains("Stuart Hunter"));
    assert!(fx.catalog.disabled_reason(&id).unwrap().contains("debug.panic"));

    assert_eq!(fs::read_dir(fx.tmp.path().join("staging")).unwrap().count(), 0);

    // disabled addons stay down
    assert_eq!(
        fx.host.runtime(Arc::clone(&fx.descriptor)).create(InstanceType::AudioDecoder),
        AddonStatus::PermanentFailure
    );
}
