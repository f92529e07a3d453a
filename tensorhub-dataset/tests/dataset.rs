use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tensorhub_dataset::{
    Dataset, DatasetOptions, DatasetRegistry, DatasetState, Indexed, META_KEY, Resolved,
};
use tensorhub_dtype::{CompositeSchema, PType, SchemaNode, SequenceSchema, TensorSchema};
use tensorhub_error::{HubError, HubResult, hub_bail};
use tensorhub_io::{ByteStoreRef, CacheConfig, InMemoryStore, open_store};
use tensorhub_tensor::{NdArray, Selector, TensorData};

fn image_schema() -> SchemaNode {
    CompositeSchema::new()
        .with_field(
            "image",
            TensorSchema::new(PType::U8, vec![None, None, Some(3)], vec![32, 32, 3]).unwrap(),
        )
        .with_field("label", PType::I64)
        .into()
}

fn random_image(seed: u64, shape: Vec<usize>) -> NdArray {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = shape.iter().product::<usize>();
    let bytes = (0..len).map(|_| rng.random::<u8>()).collect();
    NdArray::try_new(PType::U8, shape, bytes).unwrap()
}

#[fixture]
fn dir() -> TempDir {
    tempfile::Builder::new().prefix("tensorhub-dataset").tempdir().unwrap()
}

fn url(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

fn in_memory() -> ByteStoreRef {
    Arc::new(InMemoryStore::default())
}

#[rstest]
fn append_write_flush_reopen(dir: TempDir) {
    let url = url(&dir, "images");
    let shapes = [[32, 32, 3], [16, 24, 3], [1, 1, 3], [32, 7, 3], [9, 32, 3]];
    let images = shapes
        .iter()
        .enumerate()
        .map(|(i, shape)| random_image(i as u64 + 100, shape.to_vec()))
        .collect::<Vec<_>>();
    {
        let dataset = DatasetOptions::default().create_at(&url, image_schema(), 0).unwrap();
        dataset.append_shape(5).unwrap();
        for (i, image) in images.iter().enumerate() {
            dataset.write("image", &[Selector::from(i)], image.clone()).unwrap();
            dataset.write("label", &[Selector::from(i)], NdArray::scalar(i as i64 * 10)).unwrap();
        }
        dataset.flush().unwrap();
        dataset.close().unwrap();
    }

    let dataset = DatasetOptions::default().open_at(&url).unwrap();
    assert_eq!(dataset.len(), 5);
    for (i, image) in images.iter().enumerate() {
        let sample = dataset.index(i).unwrap().compute().unwrap();
        assert_eq!(sample.array_at("image").unwrap(), image, "sample {i}");
        assert_eq!(
            sample.array_at("label").unwrap().to_scalar::<i64>().unwrap(),
            i as i64 * 10
        );
        assert_eq!(
            dataset.tensor("image").unwrap().sample_shape(i).unwrap(),
            shapes[i].to_vec()
        );
    }
}

#[rstest]
fn writes_evicted_past_a_small_memory_tier_survive_reopen(dir: TempDir) {
    let url = url(&dir, "blocks");
    let schema = CompositeSchema::new().with_field(
        "block",
        TensorSchema::fixed(PType::U8, vec![64, 64]).with_chunk_size(4096),
    );
    let block = NdArray::from_vec(vec![64, 64], vec![9u8; 64 * 64]).unwrap();
    {
        let dataset = DatasetOptions::default()
            .with_cache(
                CacheConfig::default()
                    .with_memory_capacity(1024)
                    .with_local_capacity(1 << 20)
                    .with_lock(false),
            )
            .create_at(&url, schema, 2)
            .unwrap();
        dataset.write("block", &[Selector::from(1)], block.clone()).unwrap();
        let read = dataset.narrow("block").unwrap().index(1).unwrap().compute().unwrap();
        assert_eq!(read.into_array().unwrap(), block);
        dataset.close().unwrap();
    }

    let dataset = DatasetOptions::default().open_at(&url).unwrap();
    let read = dataset.narrow("block").unwrap().index(1).unwrap().compute().unwrap();
    assert_eq!(read.into_array().unwrap(), block);
}

#[rstest]
fn smaller_sample_reads_back_at_written_shape(dir: TempDir) {
    let dataset = DatasetOptions::default()
        .create_at(&url(&dir, "small"), image_schema(), 2)
        .unwrap();
    let image = random_image(11, vec![16, 16, 3]);
    dataset.write("image", &[Selector::from(1)], image.clone()).unwrap();

    let read = dataset.narrow("image").unwrap().index(1).unwrap().compute().unwrap();
    assert_eq!(read.into_array().unwrap(), image);
    assert_eq!(dataset.tensor("image").unwrap().sample_shape(1).unwrap(), vec![16, 16, 3]);
}

#[test]
fn resized_samples_read_as_zeros() {
    let dataset = DatasetOptions::default().create(in_memory(), image_schema(), 0).unwrap();
    dataset.resize_shape(10).unwrap();

    let image = dataset
        .narrow("/image")
        .unwrap()
        .index(7)
        .unwrap()
        .compute()
        .unwrap()
        .into_array()
        .unwrap();
    assert_eq!(image, NdArray::zeros(PType::U8, vec![32, 32, 3]));
    let label = dataset.narrow("label").unwrap().index(9).unwrap().compute().unwrap();
    assert_eq!(label.into_array().unwrap().to_scalar::<i64>().unwrap(), 0);
}

#[test]
fn resize_back_and_forth_keeps_data() {
    let dataset = DatasetOptions::default().create(in_memory(), image_schema(), 4).unwrap();
    dataset.write("label", &[Selector::from(2)], NdArray::scalar(42i64)).unwrap();

    dataset.resize_shape(8).unwrap();
    dataset.resize_shape(4).unwrap();

    assert_eq!(dataset.len(), 4);
    let label = dataset.narrow("label").unwrap().index(2).unwrap().compute().unwrap();
    assert_eq!(label.into_array().unwrap().to_scalar::<i64>().unwrap(), 42);
    assert!(dataset.narrow("label").unwrap().index(5).unwrap().compute().is_err());
}

#[test]
fn path_concatenation_is_equivalent() {
    let schema = CompositeSchema::new().with_field(
        "meta",
        CompositeSchema::new()
            .with_field("label", PType::I64)
            .with_field("weight", PType::F32),
    );
    let dataset = DatasetOptions::default().create(in_memory(), schema, 3).unwrap();
    dataset.write("meta/label", &[Selector::from(1)], NdArray::scalar(7i64)).unwrap();

    let nested = dataset.narrow("meta").unwrap().narrow("label").unwrap();
    let joined = dataset.narrow("meta/label").unwrap();
    assert_eq!(nested.subpath(), joined.subpath());
    assert_eq!(
        nested.index(1).unwrap().compute().unwrap(),
        joined.index(1).unwrap().compute().unwrap()
    );
}

#[test]
fn disjoint_writes_compose() {
    let dataset = DatasetOptions::default().create(in_memory(), image_schema(), 8).unwrap();
    let first = NdArray::from_vec(vec![4], vec![1i64, 2, 3, 4]).unwrap();
    let second = NdArray::from_vec(vec![4], vec![5i64, 6, 7, 8]).unwrap();
    dataset.write("label", &[Selector::from(0..4)], first).unwrap();
    dataset.write("label", &[Selector::from(4..8)], second).unwrap();

    let labels = dataset.narrow("label").unwrap().compute().unwrap().into_array().unwrap();
    assert_eq!(labels.to_vec::<i64>().unwrap(), (1..=8).collect::<Vec<_>>());
}

#[test]
fn composite_sample_fans_out() {
    let dataset = DatasetOptions::default().create(in_memory(), image_schema(), 2).unwrap();
    dataset.write("label", &[Selector::from(1)], NdArray::scalar(5i64)).unwrap();

    let sample = dataset.index(1).unwrap().compute().unwrap();
    assert!(matches!(sample, Resolved::Dict(ref fields) if fields.len() == 2));
    assert_eq!(sample.array_at("label").unwrap().to_scalar::<i64>().unwrap(), 5);
    assert_eq!(sample.array_at("image").unwrap().shape(), &[32, 32, 3]);

    let samples = dataset.samples().collect::<Vec<_>>();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].compute().unwrap(), sample);
}

#[test]
fn dictionary_regions_reject_inner_slices_and_assignment() {
    let dataset = DatasetOptions::default().create(in_memory(), image_schema(), 2).unwrap();
    assert!(dataset.view().at(&[Selector::from(0), Selector::from(1)]).is_err());
    assert!(dataset.index(0).unwrap().assign(NdArray::scalar(1i64)).is_err());
    assert!(dataset.narrow("missing").unwrap_err().is_not_found());
    assert!(
        dataset
            .narrow("image")
            .unwrap()
            .at(&[Selector::from(0), Selector::from(0), Selector::from(0), Selector::from(0), Selector::from(0)])
            .is_err()
    );
}

#[test]
fn sequences_of_dictionaries_accept_a_sequence_index() {
    let schema = CompositeSchema::new().with_field(
        "frames",
        SequenceSchema::new(
            CompositeSchema::new().with_field("score", PType::F32).into(),
            4,
        ),
    );
    let dataset = DatasetOptions::default().create(in_memory(), schema, 2).unwrap();
    assert_eq!(dataset.keys().collect::<Vec<_>>(), vec!["/frames/score"]);

    let scores = NdArray::from_vec(vec![3], vec![0.5f32, 1.5, 2.5]).unwrap();
    dataset.write("frames/score", &[Selector::from(0)], scores).unwrap();

    let frame = dataset
        .narrow("frames")
        .unwrap()
        .at(&[Selector::from(0), Selector::from(2)])
        .unwrap()
        .compute()
        .unwrap();
    assert_eq!(frame.array_at("score").unwrap().to_scalar::<f32>().unwrap(), 2.5);
}

#[test]
fn laziness_controls_indexing() {
    let dataset = DatasetOptions::default().create(in_memory(), image_schema(), 2).unwrap();
    assert!(dataset.is_lazy());
    assert!(matches!(dataset.get("label").unwrap(), Indexed::View(_)));

    dataset.disable_lazy();
    let data = dataset.view().get(0).unwrap().into_data().unwrap();
    assert!(matches!(data, Resolved::Dict(_)));
    assert!(dataset.get("label").unwrap().into_view().is_none());

    dataset.enable_lazy();
    let label = dataset.get("label").unwrap().into_data().unwrap();
    assert_eq!(label.into_array().unwrap().shape(), &[2]);
}

#[rstest]
fn index_is_always_lazy(#[values(true, false)] lazy: bool) {
    let dataset = DatasetOptions::default()
        .with_lazy(lazy)
        .create(in_memory(), image_schema(), 2)
        .unwrap();
    dataset.write("label", &[Selector::from(1)], NdArray::scalar(4i64)).unwrap();

    let view = dataset.index(1).unwrap();
    assert_eq!(view.selectors().len(), 1);
    let indexed = dataset.get_index(1).unwrap();
    assert_eq!(matches!(indexed, Indexed::View(_)), lazy);
    let sample = indexed.into_data().unwrap();
    assert_eq!(sample.array_at("label").unwrap().to_scalar::<i64>().unwrap(), 4);
    assert_eq!(view.compute().unwrap().array_at("label").unwrap().to_scalar::<i64>().unwrap(), 4);
}

#[test]
fn open_with_checks_schema_and_shape() {
    let store = in_memory();
    DatasetOptions::default()
        .open_with(store.clone(), image_schema(), 3)
        .unwrap()
        .close()
        .unwrap();

    let reopened = DatasetOptions::default().open_with(store.clone(), image_schema(), 3).unwrap();
    assert_eq!(reopened.len(), 3);
    drop(reopened);

    let other = CompositeSchema::new().with_field("text", PType::U8);
    assert!(matches!(
        DatasetOptions::default().open_with(store.clone(), other, 3).unwrap_err(),
        HubError::SchemaMismatch(..)
    ));
    assert!(matches!(
        DatasetOptions::default().open_with(store, image_schema(), 4).unwrap_err(),
        HubError::ShapeMismatch(..)
    ));
}

#[test]
fn create_refuses_existing_and_open_requires_one() {
    let store = in_memory();
    assert!(DatasetOptions::default().open(store.clone()).unwrap_err().is_not_found());
    DatasetOptions::default().create(store.clone(), image_schema(), 1).unwrap();
    assert!(DatasetOptions::default().create(store.clone(), image_schema(), 1).is_err());
    assert!(store.exists(META_KEY).unwrap());
}

#[derive(Debug, Default)]
struct RecordingRegistry {
    events: Mutex<Vec<String>>,
    fail_on_create: bool,
}

impl DatasetRegistry for RecordingRegistry {
    fn created(&self, location: &str, name: Option<&str>) -> HubResult<()> {
        if self.fail_on_create {
            hub_bail!("registry unavailable");
        }
        self.events
            .lock()
            .push(format!("created {location} {}", name.unwrap_or("-")));
        Ok(())
    }

    fn update_state(&self, location: &str, state: DatasetState) -> HubResult<()> {
        self.events.lock().push(format!("{state} {location}"));
        Ok(())
    }

    fn deleted(&self, location: &str) -> HubResult<()> {
        self.events.lock().push(format!("deleted {location}"));
        Ok(())
    }
}

#[test]
fn failed_creation_rolls_back() {
    let store = in_memory();
    let registry = Arc::new(RecordingRegistry {
        fail_on_create: true,
        ..Default::default()
    });
    let result = DatasetOptions::default()
        .with_registry(registry)
        .create(store.clone(), image_schema(), 2);
    assert!(result.is_err());
    assert!(store.list("").unwrap().is_empty());
}

#[test]
fn failed_creation_after_tensors_rolls_back() {
    let store = in_memory();
    let schema = CompositeSchema::new()
        .with_field("label", PType::I64)
        .with_field(
            "image",
            TensorSchema::new(PType::U8, vec![Some(4)], vec![4])
                .unwrap()
                .with_compressor("snappy"),
        );
    let err = DatasetOptions::default().create(store.clone(), schema, 2).unwrap_err();
    assert!(matches!(err.root(), HubError::UnsupportedCompressor(..)), "{err}");
    assert!(store.list("").unwrap().is_empty());
}

#[rstest]
#[case::in_memory(None)]
#[case::local(Some("foreign"))]
fn create_refuses_roots_holding_other_data(dir: TempDir, #[case] name: Option<&str>) {
    let store: ByteStoreRef = match name {
        Some(name) => open_store(&url(&dir, name)).unwrap(),
        None => in_memory(),
    };
    store.put("notes.txt", Bytes::from_static(b"keep me")).unwrap();

    let err = DatasetOptions::default().create(store.clone(), image_schema(), 2).unwrap_err();
    assert!(matches!(err, HubError::NotADataset(..)), "{err}");
    assert_eq!(store.list("").unwrap(), ["notes.txt"]);
    assert_eq!(store.get("notes.txt").unwrap().unwrap(), Bytes::from_static(b"keep me"));
}

#[test]
fn registry_sees_lifecycle() {
    let registry = Arc::new(RecordingRegistry::default());
    let dataset = DatasetOptions::default()
        .with_name("mnist")
        .with_registry(registry.clone())
        .create(in_memory(), image_schema(), 1)
        .unwrap();
    dataset.flush().unwrap();
    assert!(dataset.delete().unwrap());

    assert_eq!(
        *registry.events.lock(),
        vec!["created mnist mnist", "UPLOADED mnist", "deleted mnist"]
    );
}

#[rstest]
fn delete_removes_everything(dir: TempDir) {
    let url = url(&dir, "doomed");
    let dataset = DatasetOptions::default().create_at(&url, image_schema(), 2).unwrap();
    dataset.write("label", &[Selector::from(0)], NdArray::scalar(1i64)).unwrap();
    dataset.flush().unwrap();
    assert!(dataset.delete().unwrap());
    assert!(DatasetOptions::default().open_at(&url).unwrap_err().is_not_found());
}

#[test]
fn copy_is_independent() {
    let dataset = DatasetOptions::default().create(in_memory(), image_schema(), 2).unwrap();
    dataset.write("label", &[Selector::from(1)], NdArray::scalar(9i64)).unwrap();

    let copy = dataset.copy(in_memory()).unwrap();
    dataset.write("label", &[Selector::from(1)], NdArray::scalar(1i64)).unwrap();

    let copied = copy.narrow("label").unwrap().index(1).unwrap().compute().unwrap();
    assert_eq!(copied.into_array().unwrap().to_scalar::<i64>().unwrap(), 9);
}

#[test]
fn rename_and_meta_info_persist() {
    let store = in_memory();
    let dataset = DatasetOptions::default().create(store.clone(), image_schema(), 1).unwrap();
    dataset.rename("faces").unwrap();
    let mut info = serde_json::Map::new();
    info.insert("source".into(), serde_json::Value::from("camera"));
    dataset.set_meta_info(info.clone());
    dataset.close().unwrap();

    let reopened = DatasetOptions::default().open(store).unwrap();
    assert_eq!(reopened.name().as_deref(), Some("faces"));
    assert_eq!(reopened.meta_info(), info);
}

#[test]
fn uncached_dataset_writes_through() {
    let store = in_memory();
    let dataset = DatasetOptions::default()
        .with_cache(CacheConfig::uncached())
        .create(store.clone(), image_schema(), 1)
        .unwrap();
    dataset.write("label", &[Selector::from(0)], NdArray::scalar(3i64)).unwrap();
    assert!(store.list("").unwrap().iter().any(|key| key.starts_with("label/")));
    let data = dataset.narrow("label").unwrap().compute().unwrap();
    assert_eq!(data, Resolved::Tensor(TensorData::from(NdArray::from_vec(vec![1], vec![3i64]).unwrap())));
}

#[test]
fn debug_lists_keys() {
    let dataset: Dataset = DatasetOptions::default().create(in_memory(), image_schema(), 1).unwrap();
    let debug = format!("{dataset:?}");
    assert!(debug.contains("/image"));
    assert!(debug.contains("/label"));
}
