#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};

    use retrace_core::*;

    use crate::*;

    type Res = Result<(), TraversalError>;
    type Objects = TreeTraversal<TestObject>;

    thread_local! {
        static LOG: RefCell<String> = const { RefCell::new(String::new()) };
    }

    fn log(entry: &str) {
        LOG.with(|l| l.borrow_mut().push_str(entry));
    }

    fn clear_log() {
        LOG.with(|l| l.borrow_mut().clear());
    }

    fn check_log(expected: &str) {
        let actual = LOG.with(|l| std::mem::take(&mut *l.borrow_mut()));
        assert_eq!(actual, expected);
    }

    struct Inner {
        name: String,
        parent: Weak<RefCell<Inner>>,
        children: Vec<TestObject>,
    }

    /// Stand-in for an external object tree that logs every mutation.
    #[derive(Clone)]
    struct TestObject(Rc<RefCell<Inner>>);

    impl TestObject {
        fn new(name: &str) -> Self {
            Self(Rc::new(RefCell::new(Inner {
                name: name.to_string(),
                parent: Weak::new(),
                children: Vec::new(),
            })))
        }

        fn name(&self) -> String {
            self.0.borrow().name.clone()
        }

        fn detach(&self) {
            let parent = std::mem::take(&mut self.0.borrow_mut().parent);
            if let Some(parent) = parent.upgrade() {
                parent.borrow_mut().children.retain(|c| !Rc::ptr_eq(&c.0, &self.0));
            }
        }

        fn render(&self) -> String {
            let inner = self.0.borrow();
            let mut out = format!("{}(", inner.name);
            for child in &inner.children {
                out.push_str(&child.render());
                out.push(';');
            }
            out.push(')');
            out
        }
    }

    impl TreeObject for TestObject {
        fn relocate(&self, new_parent: &Self, after: Option<&Self>, _before: Option<&Self>) {
            match after {
                Some(after) => log(&format!(
                    "relocate {} into {} after {}; ",
                    self.name(),
                    new_parent.name(),
                    after.name()
                )),
                None => log(&format!("relocate {} into {}; ", self.name(), new_parent.name())),
            }
            self.detach();
            let mut parent = new_parent.0.borrow_mut();
            let index = after
                .and_then(|a| parent.children.iter().position(|c| Rc::ptr_eq(&c.0, &a.0)))
                .map_or(0, |i| i + 1);
            parent.children.insert(index, self.clone());
            self.0.borrow_mut().parent = Rc::downgrade(&new_parent.0);
        }

        fn remove(&self) {
            log(&format!("remove {}; ", self.name()));
            self.detach();
        }
    }

    fn do_object(t: &mut DataTraversal<'_>, objects: &mut Objects, name: &str) -> Res {
        objects.add_cached_object(t, || TestObject::new(name))?;
        Ok(())
    }

    fn do_container<'g>(
        t: &mut DataTraversal<'g>,
        objects: &mut Objects,
        name: &str,
        content: impl FnOnce(&mut DataTraversal<'g>, &mut Objects) -> Res,
    ) -> Res {
        let node = objects.cached_node(t, || TestObject::new(name))?;
        objects.scoped_node(node, |objects| content(t, objects))
    }

    struct Fixture {
        graph: DataGraph,
        tree: ObjectTree<TestObject>,
        root_object: TestObject,
        root: TreeNodeHandle<TestObject>,
    }

    impl Fixture {
        fn new() -> Self {
            clear_log();
            let tree = ObjectTree::new();
            let root_object = TestObject::new("root");
            let root = tree.create(root_object.clone());
            Self {
                graph: DataGraph::new(),
                tree,
                root_object,
                root,
            }
        }

        fn refresh(&mut self, controller: impl FnOnce(&mut DataTraversal<'_>, &mut Objects) -> Res) {
            let tree = &self.tree;
            let root = self.root.id();
            self.graph
                .traverse(|t| traverse_object_tree(tree, root, |objects| controller(t, objects)))
                .unwrap();
        }

        fn render(&self) -> String {
            self.root_object.render()
        }
    }

    fn simple_controller(t: &mut DataTraversal<'_>, objects: &mut Objects, n: u32) -> Res {
        for bit in 0..5 {
            let name = format!("bit{bit}");
            t.if_block(n & (1 << bit) != 0, |t| do_object(t, objects, &name))?;
        }
        Ok(())
    }

    #[test]
    fn test_simple_object_tree() {
        let mut f = Fixture::new();
        assert_eq!(f.tree.with_object(f.root.id(), |o| o.name()), Some("root".to_string()));

        f.refresh(|t, o| simple_controller(t, o, 0));
        check_log("");
        assert_eq!(f.render(), "root()");

        f.refresh(|t, o| simple_controller(t, o, 3));
        check_log("relocate bit0 into root; relocate bit1 into root after bit0; ");
        assert_eq!(f.render(), "root(bit0();bit1();)");

        f.refresh(|t, o| simple_controller(t, o, 0));
        check_log("remove bit0; remove bit1; ");
        assert_eq!(f.render(), "root()");

        f.refresh(|t, o| simple_controller(t, o, 2));
        check_log("relocate bit1 into root; ");
        assert_eq!(f.render(), "root(bit1();)");

        f.refresh(|t, o| simple_controller(t, o, 15));
        check_log(
            "relocate bit0 into root; \
             relocate bit2 into root after bit1; \
             relocate bit3 into root after bit2; ",
        );
        assert_eq!(f.render(), "root(bit0();bit1();bit2();bit3();)");

        f.refresh(|t, o| simple_controller(t, o, 13));
        check_log("remove bit1; ");
        assert_eq!(f.render(), "root(bit0();bit2();bit3();)");

        f.refresh(|t, o| simple_controller(t, o, 2));
        check_log("remove bit0; relocate bit1 into root; remove bit2; remove bit3; ");
        assert_eq!(f.render(), "root(bit1();)");
    }

    #[test]
    fn test_removal_keeps_sibling_in_place() {
        let mut f = Fixture::new();
        f.refresh(|t, o| simple_controller(t, o, 0b000011));
        check_log("relocate bit0 into root; relocate bit1 into root after bit0; ");

        f.refresh(|t, o| simple_controller(t, o, 0b000010));
        check_log("remove bit0; ");
        assert_eq!(f.render(), "root(bit1();)");
    }

    fn multilevel_controller(t: &mut DataTraversal<'_>, objects: &mut Objects, n: u32) -> Res {
        t.if_block(n & 1 != 0, |t| {
            do_container(t, objects, "bit0", |t, objects| {
                t.if_block(n & 2 != 0, |t| do_object(t, objects, "bit1"))?;
                t.if_block(n & 4 != 0, |t| {
                    do_container(t, objects, "bit2", |t, objects| {
                        t.if_block(n & 8 != 0, |t| do_object(t, objects, "bit3"))?;
                        t.if_block(n & 16 != 0, |t| do_object(t, objects, "bit4"))?;
                        Ok(())
                    })
                })?;
                t.if_block(n & 32 != 0, |t| do_object(t, objects, "bit5"))?;
                Ok(())
            })
        })?;
        t.if_block(n & 64 != 0, |t| do_object(t, objects, "bit6"))?;
        Ok(())
    }

    #[test]
    fn test_multilevel_object_tree() {
        let mut f = Fixture::new();

        f.refresh(|t, o| multilevel_controller(t, o, 3));
        check_log("relocate bit0 into root; relocate bit1 into bit0; ");
        assert_eq!(f.render(), "root(bit0(bit1(););)");

        f.refresh(|t, o| multilevel_controller(t, o, 64));
        check_log("remove bit1; remove bit0; relocate bit6 into root; ");
        assert_eq!(f.render(), "root(bit6();)");

        f.refresh(|t, o| multilevel_controller(t, o, 125));
        check_log(
            "relocate bit0 into root; \
             relocate bit2 into bit0; \
             relocate bit3 into bit2; \
             relocate bit4 into bit2 after bit3; \
             relocate bit5 into bit0 after bit2; ",
        );
        assert_eq!(f.render(), "root(bit0(bit2(bit3();bit4(););bit5(););bit6();)");

        f.refresh(|t, o| multilevel_controller(t, o, 55));
        check_log("relocate bit1 into bit0; remove bit3; remove bit6; ");
        assert_eq!(f.render(), "root(bit0(bit1();bit2(bit4(););bit5(););)");
    }

    fn team(
        t: &mut DataTraversal<'_>,
        objects: &mut Objects,
        scope: &mut NamingScope,
        names: &[&str],
    ) -> Res {
        for &name in names {
            scope.named_block(t, &make_id(name.to_string()), Lifetime::Scoped, |t| {
                do_object(t, objects, name)
            })?;
        }
        Ok(())
    }

    fn fluid_controller(
        t: &mut DataTraversal<'_>,
        objects: &mut Objects,
        a_team: &[&str],
        b_team: &[&str],
    ) -> Res {
        t.naming_context(|t, scope| {
            do_container(t, objects, "a_team", |t, objects| team(t, objects, scope, a_team))?;
            do_container(t, objects, "b_team", |t, objects| team(t, objects, scope, b_team))
        })
    }

    #[test]
    fn test_fluid_object_tree() {
        let mut f = Fixture::new();

        f.refresh(|t, o| fluid_controller(t, o, &["alf", "betty", "charlie", "dot"], &["edgar"]));
        check_log(
            "relocate a_team into root; \
             relocate alf into a_team; \
             relocate betty into a_team after alf; \
             relocate charlie into a_team after betty; \
             relocate dot into a_team after charlie; \
             relocate b_team into root after a_team; \
             relocate edgar into b_team; ",
        );
        assert_eq!(
            f.render(),
            "root(a_team(alf();betty();charlie();dot(););b_team(edgar(););)"
        );

        f.refresh(|t, o| fluid_controller(t, o, &["betty", "charlie", "dot"], &["alf", "edgar"]));
        check_log(
            "relocate betty into a_team; \
             relocate charlie into a_team after betty; \
             relocate dot into a_team after charlie; \
             remove alf; \
             relocate alf into b_team; ",
        );
        assert_eq!(
            f.render(),
            "root(a_team(betty();charlie();dot(););b_team(alf();edgar(););)"
        );

        f.refresh(|t, o| fluid_controller(t, o, &["betty", "charlie"], &["alf", "edgar"]));
        check_log("remove dot; ");
        assert_eq!(
            f.render(),
            "root(a_team(betty();charlie(););b_team(alf();edgar(););)"
        );

        f.refresh(|t, o| fluid_controller(t, o, &["betty", "edgar", "charlie"], &["alf"]));
        check_log("relocate edgar into a_team after betty; ");
        assert_eq!(
            f.render(),
            "root(a_team(betty();edgar();charlie(););b_team(alf(););)"
        );

        f.refresh(|t, o| {
            fluid_controller(t, o, &["charlie", "dot", "betty", "edgar"], &["alf"])
        });
        check_log("relocate charlie into a_team; relocate dot into a_team after charlie; ");
        assert_eq!(
            f.render(),
            "root(a_team(charlie();dot();betty();edgar(););b_team(alf(););)"
        );

        f.refresh(|t, o| {
            fluid_controller(t, o, &["edgar", "dot", "charlie", "alf"], &["betty"])
        });
        check_log(
            "relocate edgar into a_team; \
             relocate dot into a_team after edgar; \
             relocate alf into a_team after charlie; \
             remove betty; \
             relocate betty into b_team; ",
        );
        assert_eq!(
            f.render(),
            "root(a_team(edgar();dot();charlie();alf(););b_team(betty(););)"
        );
    }

    fn keyed_list(t: &mut DataTraversal<'_>, objects: &mut Objects, names: &[&str]) -> Res {
        t.naming_context(|t, scope| team(t, objects, scope, names))
    }

    #[test]
    fn test_swap_takes_one_relocation() {
        let mut f = Fixture::new();
        f.refresh(|t, o| keyed_list(t, o, &["x", "y"]));
        check_log("relocate x into root; relocate y into root after x; ");

        f.refresh(|t, o| keyed_list(t, o, &["y", "x"]));
        check_log("relocate y into root; ");
        assert_eq!(f.render(), "root(y();x();)");

        f.refresh(|t, o| keyed_list(t, o, &["y", "x"]));
        check_log("");
    }

    fn caching_controller(t: &mut DataTraversal<'_>, objects: &mut Objects, n: u32) -> Res {
        t.if_block(n & 1 != 0, |t| do_object(t, objects, "bit0"))?;
        t.if_block(n & 2 != 0, |t| do_object(t, objects, "bit1"))?;
        // Named blocks are released at the end of the scope rather than in
        // place, which exercises a different removal path.
        t.naming_context(|t, scope| {
            if n & 32 != 0 {
                scope.named_block(t, &make_id(32), Lifetime::Scoped, |t| {
                    do_object(t, objects, "bit5")
                })?;
            }
            cached_tree_region(t, objects, &make_id(n & 12), |t, objects| -> Res {
                log("traversing cached content; ");
                t.if_block(n & 4 != 0, |t| do_object(t, objects, "bit2"))?;
                t.if_block(n & 8 != 0, |t| do_object(t, objects, "bit3"))?;
                Ok(())
            })?;
            t.if_block(n & 16 != 0, |t| do_object(t, objects, "bit4"))?;
            Ok(())
        })
    }

    #[test]
    fn test_simple_content_caching() {
        let mut f = Fixture::new();
        let mut step = |n: u32, expected_log: &str, expected_tree: &str| {
            f.refresh(|t, o| caching_controller(t, o, n));
            check_log(expected_log);
            assert_eq!(f.render(), expected_tree);
        };

        step(0b000000, "traversing cached content; ", "root()");
        step(
            0b000011,
            "relocate bit0 into root; relocate bit1 into root after bit0; ",
            "root(bit0();bit1();)",
        );
        step(0b000010, "remove bit0; ", "root(bit1();)");
        step(
            0b001111,
            "relocate bit0 into root; \
             traversing cached content; \
             relocate bit2 into root after bit1; \
             relocate bit3 into root after bit2; ",
            "root(bit0();bit1();bit2();bit3();)",
        );
        step(0b001110, "remove bit0; ", "root(bit1();bit2();bit3();)");
        step(
            0b101110,
            "relocate bit5 into root after bit1; ",
            "root(bit1();bit5();bit2();bit3();)",
        );
        step(0b101100, "remove bit1; ", "root(bit5();bit2();bit3();)");
        step(0b101101, "relocate bit0 into root; ", "root(bit0();bit5();bit2();bit3();)");
        step(
            0b001101,
            "relocate bit2 into root after bit0; \
             relocate bit3 into root after bit2; \
             remove bit5; ",
            "root(bit0();bit2();bit3();)",
        );
        step(
            0b000101,
            "traversing cached content; remove bit3; ",
            "root(bit0();bit2();)",
        );
        step(0b100100, "remove bit0; relocate bit5 into root; ", "root(bit5();bit2();)");
    }

    #[derive(Debug)]
    enum TestError {
        Traversal(TraversalError),
        Failed,
    }

    impl From<TraversalError> for TestError {
        fn from(e: TraversalError) -> Self {
            TestError::Traversal(e)
        }
    }

    fn failing_controller(t: &mut DataTraversal<'_>, objects: &mut Objects, n: u32) -> Res {
        let result = cached_tree_region(t, objects, &make_id(n & 12), |t, objects| -> Result<(), TestError> {
            log("traversing cached content; ");
            t.if_block(n & 4 != 0, |t| do_object(t, objects, "bit2"))?;
            t.if_block(n & 8 != 0, |_| Err::<(), _>(TestError::Failed))?;
            Ok(())
        });
        let failed = match result {
            Ok(_) => false,
            Err(TestError::Failed) => true,
            Err(TestError::Traversal(e)) => return Err(e),
        };
        t.if_block(failed, |t| do_object(t, objects, "error"))?;
        Ok(())
    }

    #[test]
    fn test_failed_region_keeps_partial_content() {
        let mut f = Fixture::new();

        f.refresh(|t, o| failing_controller(t, o, 0b1100));
        check_log(
            "traversing cached content; \
             relocate bit2 into root; \
             relocate error into root after bit2; ",
        );
        assert_eq!(f.render(), "root(bit2();error();)");

        // Same identity: the failure is not retried, only bit2 is replayed.
        f.refresh(|t, o| failing_controller(t, o, 0b1100));
        check_log("remove error; ");
        assert_eq!(f.render(), "root(bit2();)");

        f.refresh(|t, o| failing_controller(t, o, 0b0100));
        check_log("traversing cached content; ");
        assert_eq!(f.render(), "root(bit2();)");
    }

    #[test]
    fn test_cache_clearing_forces_region_traversal() {
        let mut f = Fixture::new();
        let mut step = |visible: bool| {
            f.refresh(|t, o| {
                t.if_block(visible, |t| {
                    cached_tree_region(t, o, &make_id(0), |t, o| {
                        log("traversing cached content; ");
                        do_object(t, o, "inner")
                    })
                })?;
                Ok(())
            });
        };

        step(true);
        check_log("traversing cached content; relocate inner into root; ");
        step(true);
        check_log("");
        step(false);
        check_log("remove inner; ");
        step(true);
        check_log("traversing cached content; relocate inner into root; ");
    }

    #[test]
    fn test_content_changed_flags() {
        let mut f = Fixture::new();
        let root = f.root.id();

        f.refresh(|t, o| multilevel_controller(t, o, 0b0101));
        let bit0 = f.tree.children(root)[0];
        let bit2 = f.tree.children(bit0)[0];
        assert!(f.tree.content_changed(root));
        assert!(f.tree.content_changed(bit0));
        assert!(!f.tree.content_changed(bit2));

        f.tree.clear_content_changes();
        f.refresh(|t, o| multilevel_controller(t, o, 0b0101));
        assert!(!f.tree.content_changed(root));

        f.refresh(|t, o| multilevel_controller(t, o, 0b1101));
        assert!(f.tree.content_changed(bit2));
        assert!(f.tree.content_changed(bit0));
        assert!(f.tree.content_changed(root));
        clear_log();
    }

    #[test]
    fn test_dropping_a_handle_removes_its_object() {
        let mut f = Fixture::new();
        let child = f.tree.create(TestObject::new("child"));
        let id = child.id();
        f.refresh(|_, o| {
            o.add_object(id);
            Ok(())
        });
        check_log("relocate child into root; ");
        assert_eq!(f.tree.parent(id), Some(f.root.id()));

        drop(child);
        check_log("remove child; ");
        assert!(!f.tree.contains(id));
        assert!(f.tree.children(f.root.id()).is_empty());
        assert_eq!(f.render(), "root()");
    }

    #[test]
    fn test_graph_teardown_removes_objects() {
        let mut f = Fixture::new();
        f.refresh(|t, o| simple_controller(t, o, 3));
        clear_log();
        assert_eq!(f.tree.len(), 3);

        f.graph = DataGraph::new();
        check_log("remove bit1; remove bit0; ");
        assert_eq!(f.tree.len(), 1);
        assert_eq!(f.render(), "root()");
    }
}
