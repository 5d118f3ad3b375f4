use proptest::prelude::*;
use spikestream_storage::{
    byte_to_weight, weight_to_byte, DeviceDirection, DeviceId, DeviceRecord, DeviceRole,
    DeviceTransport, FileStore, GroupId, ModelTypeId, NoiseInjection, NoiseMode,
    NoiseParameters, ParameterStore, ParameterTable, StoreImage, WeightSnapshot,
};

fn retina_network() -> StoreImage {
    StoreImage::new()
        .neuron_type(
            1,
            "standard",
            ParameterTable::new()
                .with("threshold_val", 0.8)
                .with("decay_rate_val", 0.1)
                .with("refractory_period_val", 2.0),
        )
        .synapse_type(2, "stdp")
        .group(1, 0, 4, 4, 1)
        .group(2, 100, 2, 2, 1)
        .connection_group(
            7,
            1,
            2,
            2,
            ParameterTable::new().with("learning_rate_val", 0.01),
        )
        .connect(7, 0, 100, 0.25, 0)
        .connect(7, 5, 101, -0.5, 3)
        .noise(
            2,
            NoiseParameters {
                enabled: true,
                mode: NoiseMode::Percentage(10.0),
                injection: NoiseInjection::Effect(0.2),
            },
        )
        .device(DeviceRecord {
            id: DeviceId::new(1),
            group: GroupId::new(1),
            address: "127.0.0.1".into(),
            port: 9000,
            direction: DeviceDirection::Input,
            transport: DeviceTransport::Datagram,
            role: DeviceRole::Server,
            synchronized: true,
            width: 4,
            length: 4,
        })
}

#[test]
fn test_json_description_reloads_identically() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("retina.json");
    let store = FileStore::create(&path, retina_network()).unwrap();
    assert_eq!(store.cache().image(), retina_network());

    let reopened = FileStore::open(&path).unwrap();
    assert_eq!(reopened.cache().image(), retina_network());
    assert_eq!(reopened.devices(GroupId::new(1)).unwrap().len(), 1);
    assert!(reopened.devices(GroupId::new(2)).unwrap().is_empty());
    assert_eq!(
        reopened.noise_parameters(GroupId::new(2)).unwrap().mode,
        NoiseMode::Percentage(10.0)
    );
    // groups without an entry get the disabled default
    assert!(!reopened.noise_parameters(GroupId::new(1)).unwrap().enabled);

    let params = reopened.neuron_parameters(ModelTypeId::new(1)).unwrap().to_map();
    assert_eq!(params.get("refractory_period"), Some(2.0));
}

#[test]
fn test_weights_survive_snapshot_export() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = FileStore::create(dir.path().join("net.json"), retina_network()).unwrap();

    let weights = store.load_weights(GroupId::new(2)).unwrap();
    let snapshot_path = dir.path().join("weights.vwgt");
    WeightSnapshot::new(weights.clone()).save(&snapshot_path).unwrap();

    let loaded = WeightSnapshot::load(&snapshot_path).unwrap();
    assert_eq!(loaded.records, weights);
    assert_eq!(loaded.header.count, 2);
}

proptest! {
    #[test]
    fn prop_weight_byte_stays_in_range(w in -10.0f64..10.0) {
        let byte = weight_to_byte(w);
        prop_assert!((-127..=127).contains(&byte));
        let back = byte_to_weight(byte);
        prop_assert!((-1.0..=1.0).contains(&back));
    }

    #[test]
    fn prop_weight_quantization_error_bounded(w in -1.0f64..=1.0) {
        let back = byte_to_weight(weight_to_byte(w));
        prop_assert!((back - w).abs() <= 0.5 / 127.0 + 1e-12);
    }
}
