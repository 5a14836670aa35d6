use crate::gateway::{RecordPayload, RegistryRecord};
use crate::table::Endpoint;
use crate::Categories;

pub(crate) fn process(
    database: &str,
    code: &str,
    name: &str,
    product: &str,
    location: &str,
) -> RegistryRecord {
    RegistryRecord {
        database: database.to_string(),
        code: code.to_string(),
        name: name.to_string(),
        product: Some(product.to_string()),
        location: Some(location.to_string()),
        payload: RecordPayload::Process,
    }
}

pub(crate) fn flow(
    database: &str,
    code: &str,
    name: &str,
    categories: Option<&[&str]>,
) -> RegistryRecord {
    RegistryRecord {
        database: database.to_string(),
        code: code.to_string(),
        name: name.to_string(),
        product: None,
        location: None,
        payload: RecordPayload::Flow {
            flow_type: Some("emission".to_string()),
            categories: categories.map(|parts| Categories::new(parts.iter().copied())),
        },
    }
}

pub(crate) fn technosphere(name: &str, product: &str, location: &str, database: &str) -> Endpoint {
    Endpoint {
        name: Some(name.to_string()),
        product: Some(product.to_string()),
        location: Some(location.to_string()),
        database: Some(database.to_string()),
        ..Endpoint::default()
    }
}

pub(crate) fn biosphere(name: &str, categories: &[&str]) -> Endpoint {
    Endpoint {
        name: Some(name.to_string()),
        categories: Some(Categories::new(categories.iter().copied())),
        database: Some("biosphere3".to_string()),
        ..Endpoint::default()
    }
}
