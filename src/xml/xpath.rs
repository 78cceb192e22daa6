use super::tree::{Element, QName};
use super::{Namespaces, XmlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    name: QName,
}

/// A compiled path expression, evaluated relative to a context element.
///
/// Supported forms are a chain of element steps separated by `/` (child) or
/// `//` (descendant), ending in `text()` or `@attribute`. A leading `//`
/// searches all descendants of the context element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    steps: Vec<Step>,
    target_axis: Axis,
    target: Target,
}

impl XPath {
    pub fn compile(expr: &str, namespaces: &Namespaces) -> Result<Self, XmlError> {
        let invalid = || XmlError::InvalidPath(expr.to_owned());

        let (mut axis, rest) = if let Some(rest) = expr.strip_prefix("//") {
            (Axis::Descendant, rest)
        } else {
            (Axis::Child, expr.strip_prefix('/').unwrap_or(expr))
        };

        let pieces: Vec<&str> = rest.split('/').collect();
        let (last, init) = pieces.split_last().ok_or_else(invalid)?;

        let mut steps = Vec::with_capacity(init.len());
        for piece in init {
            if piece.is_empty() {
                axis = Axis::Descendant;
                continue;
            }
            let name = QName::parse(piece, namespaces).map_err(|e| match e {
                XmlError::UnknownPrefix { prefix, .. } => XmlError::UnknownPrefix {
                    prefix,
                    expr: expr.to_owned(),
                },
                _ => invalid(),
            })?;
            steps.push(Step { axis, name });
            axis = Axis::Child;
        }

        let target = if *last == "text()" {
            Target::Text
        } else if let Some(attr) = last.strip_prefix('@').filter(|a| !a.is_empty()) {
            Target::Attribute(attr.to_owned())
        } else {
            return Err(invalid());
        };

        Ok(Self {
            steps,
            target_axis: axis,
            target,
        })
    }

    /// Returns every non-empty, trimmed value selected by this path.
    pub fn evaluate<'a>(&self, context: &'a Element) -> Vec<&'a str> {
        let mut nodes = vec![context];
        for step in &self.steps {
            nodes = nodes
                .into_iter()
                .flat_map(|node| match step.axis {
                    Axis::Child => node.children_named(&step.name),
                    Axis::Descendant => node
                        .descendants()
                        .into_iter()
                        .filter(|d| d.name == step.name)
                        .collect(),
                })
                .collect();
        }

        if self.target_axis == Axis::Descendant {
            nodes = nodes
                .into_iter()
                .flat_map(|node| node.self_and_descendants())
                .collect();
        }

        nodes
            .into_iter()
            .filter_map(|node| match &self.target {
                Target::Text => Some(node.text.trim()),
                Target::Attribute(name) => node.attribute(name).map(str::trim),
            })
            .filter(|value| !value.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::find_first;
    use pretty_assertions::assert_eq;

    const XML: &[u8] = br#"<rss xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
        xmlns:media="http://search.yahoo.com/mrss/">
      <channel>
        <title> Show </title>
        <itunes:category text="Arts">
          <itunes:category text="Design"/>
        </itunes:category>
        <item>
          <title>Ep</title>
          <media:group>
            <media:content url="https://cdn.example.com/a.mp3" type="audio/mpeg"/>
          </media:group>
          <enclosure url="https://cdn.example.com/b.mp3"/>
        </item>
      </channel>
    </rss>"#;

    fn ns() -> Namespaces {
        Namespaces::from_pairs(&[
            ("itunes", "http://www.itunes.com/dtds/podcast-1.0.dtd"),
            ("media", "http://search.yahoo.com/mrss/"),
        ])
    }

    fn eval(expr: &str) -> Vec<String> {
        let channel = find_first(XML, "channel", &ns()).unwrap().unwrap();
        XPath::compile(expr, &ns())
            .unwrap()
            .evaluate(&channel)
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_child_text_is_trimmed() {
        assert_eq!(eval("title/text()"), vec!["Show"]);
    }

    #[test]
    fn test_values_outlive_compiled_path() {
        let channel = find_first(XML, "channel", &ns()).unwrap().unwrap();
        let titles = {
            let path = XPath::compile("item/title/text()", &ns()).unwrap();
            path.evaluate(&channel)
        };
        assert_eq!(titles, vec!["Ep"]);
    }

    #[test]
    fn test_descendant_attribute() {
        assert_eq!(eval("//itunes:category/@text"), vec!["Arts", "Design"]);
    }

    #[test]
    fn test_child_only_does_not_descend() {
        assert_eq!(eval("itunes:category/@text"), vec!["Arts"]);
    }

    #[test]
    fn test_descendant_target_axis() {
        assert_eq!(
            eval("item/media:group//@url"),
            vec!["https://cdn.example.com/a.mp3"]
        );
        assert_eq!(
            eval("item/enclosure//@url"),
            vec!["https://cdn.example.com/b.mp3"]
        );
    }

    #[test]
    fn test_descendant_step_in_middle() {
        assert_eq!(eval("item//media:content/@type"), vec!["audio/mpeg"]);
    }

    #[test]
    fn test_leading_single_slash_is_relative() {
        assert_eq!(eval("/title/text()"), vec!["Show"]);
    }

    #[test]
    fn test_missing_target_is_invalid() {
        assert!(matches!(
            XPath::compile("title", &ns()),
            Err(XmlError::InvalidPath(_))
        ));
        assert!(matches!(
            XPath::compile("title/@", &ns()),
            Err(XmlError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_unknown_prefix_reports_whole_expression() {
        let err = XPath::compile("podcast:funding/@url", &ns()).unwrap_err();
        match err {
            XmlError::UnknownPrefix { prefix, expr } => {
                assert_eq!(prefix, "podcast");
                assert_eq!(expr, "podcast:funding/@url");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
