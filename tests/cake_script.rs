//! End-to-end coverage over one script that exercises nested conditionals,
//! every declared-input kind, and both enumeration engines (spec.md §8).

use std::sync::Arc;

use archetype_core::loader::parse_script;
use archetype_core::{permute, Context, Controller, DefaultInputResolver, InputTree, Loader};

const CAKE_SCRIPT: &str = r#"
<archetype-script>
    <step label="Bake a cake">
        <inputs>
            <enum id="fruit" default="berries">
                <option value="berries"/>
                <option value="tropical"/>
            </enum>
            <inputs if="${fruit} == 'berries'">
                <enum id="berry-type" default="raspberry">
                    <option value="raspberry"/>
                    <option value="strawberry"/>
                </enum>
                <boolean id="organic" default="false" if="${berry-type} == 'raspberry'"/>
                <boolean id="frozen" default="false" if="${berry-type} == 'strawberry'"/>
            </inputs>
            <inputs if="${fruit} == 'tropical'">
                <enum id="tropical-type" default="mango">
                    <option value="mango"/>
                    <option value="banana"/>
                </enum>
                <boolean id="fare-trade" default="false" if="${tropical-type} == 'mango'"/>
                <boolean id="plantain" default="false" if="${tropical-type} == 'banana'"/>
            </inputs>
            <text id="comment" default=""/>
            <boolean id="frosting" default="false"/>
        </inputs>
    </step>
</archetype-script>
"#;

fn cake_root() -> Arc<archetype_core::ast::Node> {
    parse_script("cake.xml", CAKE_SCRIPT).unwrap().root
}

/// scenario 1: a plain default-driven run never descends into the tropical
/// branch, and within the berries branch only the sibling matching
/// `berry-type`'s value is visited.
#[test]
fn default_run_takes_the_berries_raspberry_branch() {
    let root = cake_root();
    let loader = Arc::new(Loader::new());
    let mut ctx = Context::new(".");
    let mut controller = Controller::new(DefaultInputResolver);
    let mut resolver = archetype_core::LoaderResolver::new(loader);
    archetype_core::walk(root.children(), &mut controller, &mut ctx, &mut resolver).unwrap();

    assert_eq!(ctx.get_value("fruit").unwrap().to_string(), "berries");
    assert_eq!(ctx.get_value("berry-type").unwrap().to_string(), "raspberry");
    assert_eq!(ctx.get_value("organic").unwrap().to_string(), "false");
    assert_eq!(ctx.get_value("comment").unwrap().to_string(), "");
    assert_eq!(ctx.get_value("frosting").unwrap().to_string(), "false");

    // the strawberry and tropical branches were never entered
    assert!(ctx.get_value("frozen").is_none());
    assert!(ctx.get_value("tropical-type").is_none());
    assert!(ctx.get_value("fare-trade").is_none());
    assert!(ctx.get_value("plantain").is_none());
}

/// scenario 6: the permutation engine ignores `Condition` truth while
/// collecting candidates, then drops every combination that never visits a
/// given branch down to that branch's own observed values. Each fruit branch
/// contributes 2 (inner boolean) x 2 (frosting) = 4 maps for each of its two
/// enum children, 8 per fruit, 16 total — nothing in `comment` varies since
/// it has a single candidate (its declared default).
#[test]
fn permute_enumerates_every_reachable_branch_combination() {
    let root = cake_root();
    let perms = permute(root.children(), 200);
    assert_eq!(perms.len(), 16);

    let has = |fruit: &str, branch_id: &str, branch_val: &str, frosting: &str| {
        perms.iter().any(|p| {
            let get = |id: &str| p.values.iter().find(|(k, _)| k == id).map(|(_, v)| v.as_str());
            get("fruit") == Some(fruit)
                && get(branch_id) == Some(branch_val)
                && get("frosting") == Some(frosting)
                && get("comment") == Some("")
        })
    };
    assert!(has("berries", "berry-type", "raspberry", "true"));
    assert!(has("berries", "berry-type", "strawberry", "false"));
    assert!(has("tropical", "tropical-type", "mango", "true"));
    assert!(has("tropical", "tropical-type", "banana", "false"));
}

/// `InputTree` cycles the same candidate domains lazily; with no presets its
/// step count matches the plain Cartesian product the candidate collector
/// would produce before the controller prunes unreachable branches, since
/// `InputTree` never replays a controller run at all — it just cycles.
#[test]
fn input_tree_cycles_every_declared_input_independently() {
    let root = cake_root();
    let tree = InputTree::build(root.children());
    let steps: Vec<_> = tree.collect();
    // fruit(2) * berry-type(2) * organic(2) * frozen(2) * tropical-type(2)
    // * fare-trade(2) * plantain(2) * comment(1) * frosting(2) = 256
    assert_eq!(steps.len(), 256);
    assert!(steps[0].get("fruit").is_some());
    assert_eq!(steps[0].get("comment"), Some(&String::new()));
}
