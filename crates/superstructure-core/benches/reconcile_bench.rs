use criterion::{criterion_group, criterion_main, Criterion};
use superstructure_core::{
    all_activities_found, complete_batch, convert_fields_to_key, CanonicalKey, Endpoint,
    ExchangeRecord, ExchangeTable, InMemoryRegistry, RecordPayload, ReconcileConfig,
    RegistryRecord, Side,
};

const LOCATIONS: [&str; 5] = ["DE", "FR", "GLO", "RER", "US"];

fn mk_process(index: usize) -> RegistryRecord {
    RegistryRecord {
        database: "ecoinvent".to_string(),
        code: format!("act-{index}"),
        name: format!("activity {index}"),
        product: Some(format!("product {}", index % 50)),
        location: Some(LOCATIONS[index % LOCATIONS.len()].to_string()),
        payload: RecordPayload::Process,
    }
}

fn described(record: &RegistryRecord) -> Endpoint {
    Endpoint {
        name: Some(record.name.clone()),
        product: record.product.clone(),
        location: record.location.clone(),
        categories: None,
        database: Some(record.database.clone()),
        key: None,
    }
}

fn fixture() -> (InMemoryRegistry, ExchangeTable) {
    let records = (0..2_000).map(mk_process).collect::<Vec<_>>();
    let rows = (0..1_000)
        .map(|index| {
            let to = Endpoint {
                key: Some(CanonicalKey::new("ecoinvent", format!("act-{}", (index * 7) % 2_000))),
                ..Endpoint::default()
            };
            ExchangeRecord::new(described(&records[(index * 3) % 2_000]), to)
        })
        .collect::<Vec<_>>();
    (InMemoryRegistry::new(records), ExchangeTable::new(rows))
}

fn bench_validate(c: &mut Criterion) {
    let (registry, table) = fixture();
    let config = ReconcileConfig::default();

    c.bench_function("validate_1000_rows_2000_activities", |b| {
        b.iter(|| match all_activities_found(&registry, &table, Side::From, &config) {
            Ok(true) => {}
            Ok(false) => panic!("benchmark rows should all be found"),
            Err(err) => panic!("validation benchmark failed: {err}"),
        });
    });
}

fn bench_resolve(c: &mut Criterion) {
    let (registry, table) = fixture();
    let config = ReconcileConfig::default();

    c.bench_function("resolve_keys_1000_rows_2000_activities", |b| {
        b.iter(|| {
            if let Err(err) = convert_fields_to_key(&registry, &table, Side::From, &config) {
                panic!("resolution benchmark failed: {err}");
            }
        });
    });
}

fn bench_complete(c: &mut Criterion) {
    let (registry, table) = fixture();
    let config = ReconcileConfig::default();

    c.bench_function("complete_batch_1000_rows_2000_activities", |b| {
        b.iter(|| {
            let mut working = table.clone();
            if let Err(err) = complete_batch(&registry, &mut working, &config) {
                panic!("completion benchmark failed: {err}");
            }
        });
    });
}

criterion_group!(reconcile_benches, bench_validate, bench_resolve, bench_complete);
criterion_main!(reconcile_benches);
