use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::error::{DeliveryError, Result};

/// Thin wrapper over `quick_xml::Writer` that emits compact, byte-stable
/// output: no indentation and attributes in call order.
pub(crate) struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub(crate) fn document() -> Result<Self> {
        let mut writer = Self::fragment();
        writer.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(writer)
    }

    pub(crate) fn fragment() -> Self {
        Self {
            inner: Writer::new(Vec::new()),
        }
    }

    pub(crate) fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.write(Event::Start(start))
    }

    pub(crate) fn close(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    pub(crate) fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.write(Event::Empty(start))
    }

    pub(crate) fn leaf(&mut self, name: &str, text: &str) -> Result<()> {
        self.leaf_with(name, &[], text)
    }

    pub(crate) fn leaf_with(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> Result<()> {
        self.open(name, attrs)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    /// Splices an already rendered fragment into the output.
    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.inner.get_mut().extend_from_slice(bytes);
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.inner.into_inner()
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.inner
            .write_event(event)
            .map_err(|err| DeliveryError::Xml(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_escaped_and_output_compact() {
        let mut w = XmlWriter::fragment();
        w.open("a", &[("k", "v")]).unwrap();
        w.leaf("b", "x < y & z").unwrap();
        w.empty("c", &[]).unwrap();
        w.close("a").unwrap();
        let out = String::from_utf8(w.finish()).unwrap();
        assert_eq!(out, r#"<a k="v"><b>x &lt; y &amp; z</b><c/></a>"#);
    }
}
