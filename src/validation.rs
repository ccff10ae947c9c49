use log::warn;

use crate::database::Document;
use crate::error::TelemetryError;
use crate::schema::{Collection, RequiredAttributes};

pub struct SchemaValidator<'a> {
    attributes: &'a RequiredAttributes,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(attributes: &'a RequiredAttributes) -> Self {
        SchemaValidator { attributes }
    }

    pub fn validate_batch(
        &self,
        collection: Collection,
        documents: &[Document],
    ) -> Result<(), TelemetryError> {
        let required = self.attributes.for_collection(collection);
        documents
            .iter()
            .try_for_each(|document| validate(collection, document, required))
    }
}

/// Checks a single document against `required`, reporting the first absent
/// attribute. A `null` value counts as present.
pub fn validate<S: AsRef<str>>(
    collection: Collection,
    document: &Document,
    required: &[S],
) -> Result<(), TelemetryError> {
    match required
        .iter()
        .map(|attr| attr.as_ref())
        .find(|attr| !document.contains_key(*attr))
    {
        None => Ok(()),
        Some(missing) => {
            let rendered = serde_json::to_string(document)
                .unwrap_or_else(|_| String::from("<unprintable>"));
            warn!("Rejecting {} batch: {} missing in {}", collection, missing, rendered);
            Err(TelemetryError::MissingAttribute {
                collection,
                attribute: missing.to_string(),
                document: rendered,
            })
        }
    }
}
