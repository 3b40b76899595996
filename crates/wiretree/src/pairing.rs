//! Request/response pairing

use std::sync::Arc;

use crate::arena::ElementArena;
use crate::connection::connection_of;
use crate::element::Element;
use crate::error::ConversionError;
use crate::facet::Capability;
use crate::facets::{Http2StreamFacet, PairingFacet, PairingRole};
use crate::metadata::PAIRED_MESSAGE_ID;
use crate::pipeline::{Converter, Phase, PipelineHandle};
use crate::trace_debug;

/// Links top-level responses to their requests.
///
/// A message carrying a `pairedMessageUuid` is linked to the message with
/// that uuid, and only to it. Otherwise a response is linked to the most
/// recent earlier request that is unpaired, on the same connection and of
/// the same protocol (the same stream for HTTP/2). Links are never revised.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairingConverter;

impl Converter for PairingConverter {
    fn name(&self) -> &'static str {
        "pairing"
    }

    fn phase(&self) -> Phase {
        Phase::Enrichment
    }

    fn consume_element(
        &self,
        element: &Arc<Element>,
        handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError> {
        if !element.is_top_level() || element.has_capability(Capability::Pairing) {
            return Ok(());
        }
        let arena = handle.arena();
        if element.has_capability(Capability::HttpResponse) {
            match find_request(arena, element)? {
                Some(request) => link(&request, element)?,
                None => {
                    trace_debug!("no request found for response {}", element.id());
                },
            }
        } else if element.has_capability(Capability::HttpRequest) {
            // The response may have been restored first
            if let Some(response) = find_explicit(arena, element)?
                && response.has_capability(Capability::HttpResponse)
                && !response.has_capability(Capability::Pairing)
            {
                link(element, &response)?;
            }
        }
        Ok(())
    }
}

/// Message named by `element`'s paired message id, most recent first
fn find_explicit(
    arena: &ElementArena,
    element: &Element,
) -> Result<Option<Arc<Element>>, ConversionError> {
    let Some(paired) = element.get_metadata(PAIRED_MESSAGE_ID)? else {
        return Ok(None);
    };
    Ok(arena
        .messages_most_recent_first()
        .into_iter()
        .find(|message| message.id() != element.id() && message.uuid() == paired))
}

/// Request `response` should be paired with, if any
pub fn find_request(
    arena: &ElementArena,
    response: &Element,
) -> Result<Option<Arc<Element>>, ConversionError> {
    if response.get_metadata(PAIRED_MESSAGE_ID)?.is_some() {
        let explicit = find_explicit(arena, response)?;
        if explicit.is_none() {
            trace_debug!("paired message of response {} is not known", response.id());
        }
        return Ok(explicit.filter(|request| request.has_capability(Capability::HttpRequest)));
    }

    let connection = connection_of(response).map(|(connection, _)| connection);
    let stream_id = response.facet::<Http2StreamFacet>().map(|f| f.stream_id);
    Ok(arena
        .messages_most_recent_first()
        .into_iter()
        .skip_while(|message| message.id() != response.id())
        .skip(1)
        .find(|candidate| {
            if !candidate.has_capability(Capability::HttpRequest)
                || candidate.has_capability(Capability::Pairing)
            {
                return false;
            }
            if let Some(connection) = connection
                && let Some((other, _)) = connection_of(candidate)
                && other != connection
            {
                return false;
            }
            if let Ok(Some(partner)) = candidate.get_metadata(PAIRED_MESSAGE_ID)
                && partner != response.uuid()
            {
                return false;
            }
            candidate.facet::<Http2StreamFacet>().map(|f| f.stream_id) == stream_id
        }))
}

/// Install the pairing on both messages and record each other's uuid
pub fn link(request: &Element, response: &Element) -> Result<(), ConversionError> {
    request.add_or_replace_facet(PairingFacet {
        partner:      response.id(),
        partner_uuid: response.uuid(),
        role:         PairingRole::Request,
    });
    response.add_or_replace_facet(PairingFacet {
        partner:      request.id(),
        partner_uuid: request.uuid(),
        role:         PairingRole::Response,
    });
    request.set_metadata(PAIRED_MESSAGE_ID, response.uuid())?;
    response.set_metadata(PAIRED_MESSAGE_ID, request.uuid())?;
    trace_debug!("paired request {} with response {}", request.id(), response.id());
    Ok(())
}

/// The message `element` is paired with
pub fn pair_of(arena: &ElementArena, element: &Element) -> Option<Arc<Element>> {
    element
        .facet::<PairingFacet>()
        .and_then(|pairing| arena.get(pairing.partner))
}
