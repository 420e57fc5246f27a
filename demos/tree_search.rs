//! Finds the first data key starting with "left" in a small tree.

use shimmytmpl::{FunctionRegistry, Record, Template, TemplateSource, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const TEMPLATE: &str = r#"First left key: {{ range $node := .Nodes -}}
    {{- range $key := $node.Data -}}
        {{- with $keyPrefix := (slice $key 0 4) -}}
            {{- if eq $keyPrefix "left" }} {{- $key }} {{ break }} {{ end -}}
        {{- end -}}
    {{- end -}}
{{- end -}}"#;

#[derive(Debug, Default)]
struct Node {
    left: Option<Arc<Node>>,
    right: Option<Arc<Node>>,
    data: Value,
}

impl Record for Node {
    fn type_name(&self) -> &str {
        "Node"
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "Left" => Some(self.left.clone().map_or(Value::Null, Value::from)),
            "Right" => Some(self.right.clone().map_or(Value::Null, Value::from)),
            "Data" => Some(self.data.clone()),
            _ => None,
        }
    }

    fn field_names(&self) -> Vec<String> {
        ["Left", "Right", "Data"].map(String::from).to_vec()
    }
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<Arc<Node>>,
}

impl Record for Tree {
    fn type_name(&self) -> &str {
        "Tree"
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "Nodes" => Some(Value::Seq(
                self.nodes.iter().cloned().map(Value::from).collect(),
            )),
            _ => None,
        }
    }
}

fn main() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let left = Arc::new(Node {
        data: [("key1", "left1"), ("key2", "left2")].into_iter().collect(),
        ..Node::default()
    });
    let right = Arc::new(Node {
        data: [("key1", "right1")].into_iter().collect(),
        ..Node::default()
    });
    let root = Arc::new(Node {
        left: Some(Arc::clone(&left)),
        right: Some(Arc::clone(&right)),
        data: Value::Null,
    });
    let tree = Tree {
        nodes: vec![root, left, right],
    };

    let tpl = Template::parse("tree", TEMPLATE, &FunctionRegistry::new())
        .map_err(|err| TemplateSource::new("tree", TEMPLATE).report(err))?;
    let rendered = tpl
        .execute(&Value::record(tree))
        .map_err(|err| tpl.report(err))?;
    println!("{rendered}");
    Ok(())
}
