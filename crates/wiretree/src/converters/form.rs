//! `application/x-www-form-urlencoded` bodies

use std::sync::Arc;

use crate::element::Element;
use crate::error::ConversionError;
use crate::facet::Capability;
use crate::facets::{ContentTypeFacet, DecodedTextFacet, MapFacet};
use crate::multimap::OrderedMultimap;
use crate::pipeline::{Converter, Phase, PipelineHandle};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Decode `%XX` escapes and `+` as space.
///
/// A `%` not followed by two hex digits is kept as is.
pub fn percent_decode(input: &[u8]) -> Vec<u8> {
    let spaced: Vec<u8> = input
        .iter()
        .map(|&byte| if byte == b'+' { b' ' } else { byte })
        .collect();
    percent_encoding::percent_decode(&spaced).collect()
}

/// Splits form bodies into name-keyed value elements.
///
/// Values are views of the raw body carrying their decoded text; names are
/// decoded. Repeated names keep every value in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormUrlEncodedConverter;

impl Converter for FormUrlEncodedConverter {
    fn name(&self) -> &'static str {
        "formUrlEncoded"
    }

    fn phase(&self) -> Phase {
        Phase::ContentTypeDecoding
    }

    fn consume_element(
        &self,
        element: &Arc<Element>,
        handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError> {
        if element.has_capability(Capability::Map) {
            return Ok(());
        }
        let content_type = match element.facet::<ContentTypeFacet>() {
            Some(content_type) if content_type.is(FORM_URLENCODED) => content_type,
            _ => return Ok(()),
        };

        let charset = content_type
            .charset
            .clone()
            .unwrap_or_else(|| handle.arena().effective_charset(element));
        let content = element.content();
        let data = content.as_bytes();
        let mut entries = OrderedMultimap::new();
        let mut start = 0;
        while start <= data.len() {
            let end = data[start..]
                .iter()
                .position(|&b| b == b'&')
                .map_or(data.len(), |p| start + p);
            if end > start {
                let field = &data[start..end];
                let (name, value_start) = match field.iter().position(|&b| b == b'=') {
                    Some(eq) => (&field[..eq], start + eq + 1),
                    None => (field, end),
                };
                let value = handle.create_child(element.id(), content.sub_range(value_start, end)?)?;
                value.add_facet(DecodedTextFacet {
                    text: charset.decode(&percent_decode(&data[value_start..end])),
                });
                entries.put(charset.decode(&percent_decode(name)), value.id());
            }
            start = end + 1;
        }
        element.add_facet(MapFacet { entries });
        Ok(())
    }
}
