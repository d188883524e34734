use std::cell::RefCell;
use std::rc::Rc;

use retrace_core::{DataGraph, DataTraversal, Lifetime, TraversalError, make_id};
use retrace_tree::{ObjectTree, TreeObject, TreeTraversal, traverse_object_tree};

type Journal = Rc<RefCell<Vec<String>>>;

/// A list row that only records what the reconciler asks of it.
struct Row {
    label: String,
    journal: Journal,
}

impl TreeObject for Row {
    fn relocate(&self, new_parent: &Self, after: Option<&Self>, _before: Option<&Self>) {
        let entry = match after {
            Some(after) => format!("move {} into {} after {}", self.label, new_parent.label, after.label),
            None => format!("move {} to the front of {}", self.label, new_parent.label),
        };
        self.journal.borrow_mut().push(entry);
    }

    fn remove(&self) {
        self.journal.borrow_mut().push(format!("remove {}", self.label));
    }
}

fn list(
    t: &mut DataTraversal<'_>,
    rows: &mut TreeTraversal<Row>,
    items: &[&str],
    journal: &Journal,
) -> Result<(), TraversalError> {
    t.naming_context(|t, scope| {
        for &item in items {
            scope.named_block(t, &make_id(item.to_string()), Lifetime::Scoped, |t| {
                rows.add_cached_object(t, || Row {
                    label: item.to_string(),
                    journal: journal.clone(),
                })?;
                Ok::<_, TraversalError>(())
            })?;
        }
        Ok(())
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let journal = Journal::default();
    let tree = ObjectTree::new();
    let root = tree.create(Row {
        label: "list".to_string(),
        journal: journal.clone(),
    });
    let mut graph = DataGraph::new();

    let passes: [&[&str]; 5] = [
        &["apple", "banana", "cherry"],
        &["cherry", "apple", "banana"],
        &["cherry", "banana"],
        &["date", "cherry", "banana", "apple"],
        &[],
    ];

    for (pass, items) in passes.iter().enumerate() {
        graph.traverse(|t| {
            traverse_object_tree(&tree, root.id(), |rows| list(t, rows, items, &journal))
        })?;

        let operations: Vec<String> = journal.borrow_mut().drain(..).collect();
        println!("pass {pass}: {items:?}");
        for operation in &operations {
            println!("  {operation}");
        }
        log::info!(
            "pass {pass}: {} operations, {} named blocks live",
            operations.len(),
            graph.live_named_blocks()
        );
    }

    Ok(())
}
