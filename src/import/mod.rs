//! XML import: streams markup into graph content through a [`Destination`].
//!
//! Elements become nodes or properties depending on what they contain:
//! - attributes become properties of the element's node
//! - an element with child elements is a node
//! - a property-like element closing with text becomes a property of its parent
//! - a node with trailing text stores it as `jcr:xmlcharacters`
//!
//! Same-name siblings get 1-based indexes in document order.

mod destination;
mod entry;
mod handler;
mod sax;

pub use destination::{Destination, GraphDestination};
pub use handler::{AttributeScoping, ImportOptions, PropertyElementPolicy, XmlImporter};
pub use sax::{parse_xml, parse_xml_reader, Attribute, ContentHandler, QualifiedName};

use std::io::BufRead;

use crate::error::Result;

/// Import a whole document into `destination` and return it.
pub fn import_xml<D: Destination>(xml: &str, destination: D, options: ImportOptions) -> Result<D> {
    let mut importer = XmlImporter::new(destination, options);
    parse_xml(xml, &mut importer)?;
    Ok(importer.into_destination())
}

/// Like [`import_xml`], reading the document from `source`.
pub fn import_xml_from<R: BufRead, D: Destination>(
    source: R,
    destination: D,
    options: ImportOptions,
) -> Result<D> {
    let mut importer = XmlImporter::new(destination, options);
    parse_xml_reader(source, &mut importer)?;
    Ok(importer.into_destination())
}
