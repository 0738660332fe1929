//! Building blocks of the fluentd configuration
//!
//! A [`Block`] is a directive like `<match **>` with parameter lines and nested blocks. Blocks
//! render with two spaces of indentation per nesting level.

use std::fmt::{self, Display, Write};

use super::{Context, Result};

#[derive(Clone, Debug, PartialEq)]
enum Element {
    Line(String),
    Block(Block),
}

/// A fluentd directive with its body
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    directive: String,
    argument: Option<String>,
    body: Vec<Element>,
}

impl Block {
    pub fn new(directive: impl Into<String>) -> Self {
        Block {
            directive: directive.into(),
            argument: None,
            body: vec![],
        }
    }

    /// A directive with an argument, e.g. `<match kubernetes.**>`
    pub fn with_argument(directive: impl Into<String>, argument: impl Into<String>) -> Self {
        Block {
            argument: Some(argument.into()),
            ..Block::new(directive)
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.body.push(Element::Line(line.into()));
        self
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body
            .extend(lines.into_iter().map(|line| Element::Line(line.into())));
        self
    }

    /// Adds the line `<key> <value>`
    pub fn param(self, key: &str, value: impl Display) -> Self {
        self.line(format!("{key} {value}"))
    }

    /// Adds the line `<key> <value>` if a value is given
    pub fn param_opt(self, key: &str, value: Option<impl Display>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn child(mut self, block: Block) -> Self {
        self.body.push(Element::Block(block));
        self
    }

    pub fn child_opt(self, block: Option<Block>) -> Self {
        match block {
            Some(block) => self.child(block),
            None => self,
        }
    }

    pub fn children(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.body.extend(blocks.into_iter().map(Element::Block));
        self
    }

    /// Applies `f` only if the condition holds
    pub fn when(self, condition: bool, f: impl FnOnce(Self) -> Self) -> Self {
        if condition { f(self) } else { self }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    fn render(&self, out: &mut String, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match &self.argument {
            Some(argument) => writeln!(out, "{indent}<{} {argument}>", self.directive)?,
            None => writeln!(out, "{indent}<{}>", self.directive)?,
        }
        for element in &self.body {
            match element {
                Element::Line(line) => writeln!(out, "{indent}  {line}")?,
                Element::Block(block) => block.render(out, depth + 1)?,
            }
        }
        writeln!(out, "{indent}</{}>", self.directive)
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out, 0)?;
        f.write_str(&out)
    }
}

/// Renders top-level blocks separated by empty lines
pub fn render_all(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A section of the configuration, generated from the context
pub type Emit<'a> = Box<dyn Fn(&Context<'_>) -> Result<String> + 'a>;

/// A section with fixed content
pub fn literal<'a>(text: &'a str) -> Emit<'a> {
    Box::new(move |_| Ok(text.to_owned()))
}

/// A section consisting of the blocks returned by `f`
pub fn blocks<'a>(f: impl Fn(&Context<'_>) -> Result<Vec<Block>> + 'a) -> Emit<'a> {
    Box::new(move |ctx| f(ctx).map(|blocks| render_all(&blocks)))
}

/// Concatenates the non-empty sections, separated by empty lines
pub fn sequence(parts: Vec<Emit<'_>>) -> Emit<'_> {
    Box::new(move |ctx| {
        let mut rendered = vec![];
        for part in &parts {
            let text = part(ctx)?;
            if !text.trim().is_empty() {
                rendered.push(text.trim_end().to_owned());
            }
        }
        Ok(rendered.join("\n\n") + "\n")
    })
}

/// A section which is only generated if the predicate holds for the context
pub fn when<'a>(predicate: impl Fn(&Context<'_>) -> bool + 'a, part: Emit<'a>) -> Emit<'a> {
    Box::new(move |ctx| {
        if predicate(ctx) {
            part(ctx)
        } else {
            Ok(String::new())
        }
    })
}

/// The fluentd label of a user defined name, e.g. `@MY_PIPELINE` for `my-pipeline`
pub fn label_name(name: &str) -> String {
    format!("@{}", normalize(name).to_uppercase())
}

/// The identifier of a plugin and its file buffer, e.g. `my_output` for `my-output`
pub fn store_id(name: &str) -> String {
    normalize(name).to_lowercase()
}

fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Quotes a value for the fluentd configuration
pub fn quote(value: &str) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Block, label_name, render_all, store_id};

    #[test]
    fn test_render_nested_block() {
        let block = Block::with_argument("match", "**")
            .param("@type", "stdout")
            .param_opt("@id", None::<&str>)
            .child(Block::new("buffer").param("@type", "memory"))
            .when(false, |block| block.line("never"));

        assert_eq!(
            concat!(
                "<match **>\n",
                "  @type stdout\n",
                "  <buffer>\n",
                "    @type memory\n",
                "  </buffer>\n",
                "</match>\n",
            ),
            block.to_string()
        );
    }

    #[test]
    fn test_render_all_separates_blocks() {
        let blocks = [
            Block::new("system").param("log_level", "warn"),
            Block::with_argument("label", "@MY_PIPELINE"),
        ];

        assert_eq!(
            concat!(
                "<system>\n",
                "  log_level warn\n",
                "</system>\n",
                "\n",
                "<label @MY_PIPELINE>\n",
                "</label>\n",
            ),
            render_all(&blocks)
        );
    }

    #[test]
    fn test_label_name_and_store_id() {
        assert_eq!("@MY_PIPELINE", label_name("my-pipeline"));
        assert_eq!("@ES_1_EXAMPLE_COM", label_name("es.1.example.com"));
        assert_eq!("http_receiver", store_id("HTTP-Receiver"));
    }
}
