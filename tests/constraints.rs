mod common;

use common::*;
use runtime_loader::{
    assembly::{
        GenericConstraint, StorageMode, TemplateRef, TraitField, TraitFunction,
        TraitGenericFunction, TraitTemplate, TraitType,
    },
    types::{ExportValue, FieldHandle, TypeId},
    ErrorCode, Loader,
};

fn with_constraints(
    counts: &[usize],
    refs: Vec<runtime_loader::assembly::RefEntry>,
    constraints: Vec<GenericConstraint>,
) -> runtime_loader::assembly::GenericDeclaration {
    let mut declaration = decl(counts, refs);
    declaration.constraints = constraints;
    declaration
}

fn trait_template(refs: Vec<runtime_loader::assembly::RefEntry>) -> TraitTemplate {
    TraitTemplate {
        generic: decl(&[], refs),
        ..Default::default()
    }
}

fn load(loader: &Loader, name: &str, arguments: &[TypeId]) -> Result<TypeId, ErrorCode> {
    let arguments = if arguments.is_empty() {
        vec![]
    } else {
        vec![arguments.to_vec()]
    };
    loader
        .get_type_by_name("App", name, arguments)
        .map(|t| t.id)
        .map_err(|e| e.code())
}

#[test]
fn test_same_with_nested_generics() {
    // A<T> requires SAME(B<T, C<T>>, B<D, ANY>)
    let mut app = AssemblyBuilder::new("App");
    let refs = vec![
        r(K::Assembly, 1),
        r(K::Argument, 0),
        r(K::Clone, 4),
        E,
        r(K::Assembly, 2),
        r(K::Argument, 0),
        E,
        r(K::Assembly, 1),
        r(K::Clone, 11),
        r(K::Any, 0),
        E,
        r(K::Assembly, 3),
        E,
    ];
    let same = constraint(ConstraintKind::Same, 0, 0, &[7], "");
    app.add_type("A", value(with_constraints(&[1], refs, vec![same])));
    app.add_type("B", value(decl(&[2], vec![])));
    app.add_type("C", value(decl(&[1], vec![])));
    app.add_type("D", value(decl(&[], vec![])));
    app.add_type("E", value(decl(&[], vec![])));
    let loader = loader(vec![core(), app.build()]);

    let d = load(&loader, "App.D", &[]).unwrap();
    let e = load(&loader, "App.E", &[]).unwrap();
    assert!(load(&loader, "App.A", &[d]).is_ok());

    let before = loader.loaded_type_count();
    assert_eq!(load(&loader, "App.A", &[e]), Err(ErrorCode::Generic));
    assert_eq!(loader.loaded_type_count(), before);
}

#[test]
fn test_try_turns_failed_instantiation_into_missing_type() {
    let mut app = AssemblyBuilder::new("App");
    let d = 2;
    // Wrapper<X> requires SAME(X, D)
    let wrapper = with_constraints(
        &[1],
        vec![r(K::Argument, 0), r(K::Assembly, d), E],
        vec![constraint(ConstraintKind::Same, 0, 0, &[1], "")],
    );
    // A2<T> requires EXIST(TRY Wrapper<T>)
    let a2 = with_constraints(
        &[1],
        vec![r(K::Try, 1), r(K::Assembly, 0), r(K::Argument, 0), E],
        vec![constraint(ConstraintKind::Exist, 0, 0, &[], "")],
    );
    app.add_type("Wrapper", value(wrapper));
    app.add_type("A2", value(a2));
    app.add_type("D", value(decl(&[], vec![])));
    app.add_type("E", value(decl(&[], vec![])));
    let loader = loader(vec![core(), app.build()]);

    let d = load(&loader, "App.D", &[]).unwrap();
    let e = load(&loader, "App.E", &[]).unwrap();
    assert_eq!(load(&loader, "App.Wrapper", &[e]), Err(ErrorCode::Generic));

    assert!(load(&loader, "App.A2", &[d]).is_ok());
    let count = loader.loaded_type_count();
    assert!(load(&loader, "App.Wrapper", &[d]).is_ok());
    assert_eq!(loader.loaded_type_count(), count);

    assert_eq!(load(&loader, "App.A2", &[e]), Err(ErrorCode::Generic));
    assert_eq!(loader.loaded_type_count(), count);
}

/// Two overloads of `Get` on `Num`; only `GetGoodNum` can be instantiated.
fn overload_app() -> runtime_loader::assembly::Assembly {
    let mut app = AssemblyBuilder::new("App");
    let (i32_, i64_, num, bad) = (0, 1, 2, 3);
    app.add_type("I32", value(decl(&[], vec![])));
    app.add_type("I64", value(decl(&[], vec![])));
    let mut num_type = value(decl(
        &[],
        vec![r(K::Assembly, 0), E, r(K::Assembly, 1), E],
    ));
    num_type.public_functions = vec![named("Get", 0), named("Get", 2)];
    app.add_type("Num", num_type);
    let mut bad_type = value(decl(&[], local(2)));
    bad_type.public_functions = vec![named("Get", 0)];
    app.add_type("Bad", bad_type);

    let impossible = || constraint(ConstraintKind::Same, 0, 0, &[2], "");
    app.add_function(
        "GetBadNum",
        function(
            with_constraints(
                &[],
                vec![
                    r(K::Assembly, i32_),
                    E,
                    r(K::Assembly, i64_),
                    E,
                    r(K::Assembly, num),
                    E,
                ],
                vec![impossible()],
            ),
            Some(0),
            &[4],
        ),
    );
    app.add_function(
        "GetGoodNum",
        function(
            decl(&[], vec![r(K::Assembly, i64_), E, r(K::Assembly, num), E]),
            Some(0),
            &[2],
        ),
    );
    app.add_function(
        "GetBadBad",
        function(
            with_constraints(
                &[],
                vec![
                    r(K::Assembly, i32_),
                    E,
                    r(K::Assembly, i64_),
                    E,
                    r(K::Assembly, bad),
                    E,
                ],
                vec![impossible()],
            ),
            Some(2),
            &[4],
        ),
    );

    // trait Tr { fn Get(Self) -> ANY }
    let mut tr = trait_template(vec![r(K::SelfType, 0), r(K::Any, 0)]);
    tr.functions = vec![TraitFunction {
        export_name: "get".to_string(),
        name: "Get".to_string(),
        return_type: Some(1),
        parameters: vec![0],
    }];
    app.add_trait("Tr", tr);

    // Use<T> requires Tr on T and calls its `get`.
    let mut use_decl = with_constraints(
        &[1],
        vec![r(K::Argument, 0), r(K::Constraint, 0)],
        vec![constraint(ConstraintKind::TraitAssembly, 0, 0, &[], "Tr")],
    );
    use_decl.names = vec!["Tr/get".to_string()];
    let mut use_fn = function(use_decl, None, &[]);
    use_fn.referenced_functions = vec![1];
    use_fn.instructions = vec![0];
    app.add_function("Use", use_fn);
    app.build()
}

#[test]
fn test_trait_search_skips_overload_that_fails_to_instantiate() {
    let loader = loader(vec![core(), overload_app()]);
    let num = load(&loader, "App.Num", &[]).unwrap();
    let bad = load(&loader, "App.Bad", &[]).unwrap();

    let used = loader
        .get_function_by_name("App", "App.Use", vec![vec![num]])
        .unwrap();
    let good = loader
        .get_function_by_name("App", "App.GetGoodNum", vec![])
        .unwrap();
    assert_eq!(used.referenced_functions, vec![Some(good.id)]);
    assert_eq!(used.exports.get("Tr/get"), Some(&ExportValue::Function(good.id)));
    assert_eq!(loader.loaded_function_count(), 2);

    let err = loader
        .get_function_by_name("App", "App.Use", vec![vec![bad]])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Generic);
    assert_eq!(loader.loaded_function_count(), 2);
}

#[test]
fn test_trait_subtype_export_feeds_later_constraint() {
    let mut app = AssemblyBuilder::new("App");
    let int32 = app.import_type("Core", "Core.Int32", &[]);
    let int64 = app.import_type("Core", "Core.Int64", &[]);

    // trait Tr2 { type Item = Self::Item; }
    let mut tr2 = trait_template(vec![r(K::SelfType, 0), r(K::Subtype, 0), E]);
    tr2.generic.names = vec!["Item".to_string()];
    tr2.types = vec![TraitType {
        export_name: "Item".to_string(),
        reference: 1,
    }];
    let tr2 = app.add_trait("Tr2", tr2);

    // Holder<T> requires Tr2 on T as C, then SAME(C/Item, Int32); field item: C/Item
    let mut holder_decl = with_constraints(
        &[1],
        vec![
            r(K::Argument, 0),
            r(K::Constraint, 0),
            r(K::Import, int32),
            E,
        ],
        vec![
            constraint(ConstraintKind::TraitAssembly, tr2, 0, &[], "C"),
            constraint(ConstraintKind::Same, 0, 1, &[2], ""),
        ],
    );
    holder_decl.names = vec!["C/Item".to_string()];
    let mut holder = value(holder_decl);
    holder.fields = fields(&[("item", 1)]);
    app.add_type("Holder", holder);

    let mut container = value(decl(&[], vec![r(K::Import, int32), E]));
    container.public_subtypes = vec![named("Item", 0)];
    app.add_type("Container", container);
    let mut container2 = value(decl(&[], vec![r(K::Import, int64), E]));
    container2.public_subtypes = vec![named("Item", 0)];
    app.add_type("Container2", container2);
    app.add_type("Plain", value(decl(&[], vec![])));

    let loader = loader(vec![core(), app.build()]);
    register_integers(&loader);
    let int32 = loader.get_type_by_name("Core", "Core.Int32", vec![]).unwrap();

    let container = load(&loader, "App.Container", &[]).unwrap();
    let holder = loader
        .get_type_by_name("App", "App.Holder", vec![vec![container]])
        .unwrap();
    assert_eq!(
        holder.exports.get("C/Item"),
        Some(&ExportValue::Type(Some(int32.id)))
    );
    assert_eq!(holder.field("item").map(|f| f.field_type), Some(int32.id));
    assert_eq!(holder.size(), 4);

    let container2 = load(&loader, "App.Container2", &[]).unwrap();
    assert_eq!(load(&loader, "App.Holder", &[container2]), Err(ErrorCode::Generic));

    let plain = load(&loader, "App.Plain", &[]).unwrap();
    assert_eq!(load(&loader, "App.Holder", &[plain]), Err(ErrorCode::Generic));
}

#[test]
fn test_trait_field_export() {
    let mut app = AssemblyBuilder::new("App");
    let int32 = app.import_type("Core", "Core.Int32", &[]);
    let int64 = app.import_type("Core", "Core.Int64", &[]);

    // trait HasX { x: Int32 }
    let mut has_x = trait_template(vec![r(K::Import, int32), E]);
    has_x.fields = vec![TraitField {
        export_name: "x".to_string(),
        name: "x".to_string(),
        type_ref: 0,
    }];
    let has_x = app.add_trait("HasX", has_x);

    // User<T> requires HasX on T as H and exports H/x
    let mut user_decl = with_constraints(
        &[1],
        vec![r(K::Argument, 0), r(K::Constraint, 0)],
        vec![constraint(ConstraintKind::TraitAssembly, has_x, 0, &[], "H")],
    );
    user_decl.names = vec!["H/x".to_string()];
    app.add_type("User", value(user_decl));

    let mut good = value(decl(&[], vec![r(K::Import, int64), E, r(K::Import, int32), E]));
    good.fields = fields(&[("y", 0), ("x", 2)]);
    app.add_type("Good", good);
    let mut bad = value(decl(&[], vec![r(K::Import, int64), E]));
    bad.fields = fields(&[("x", 0)]);
    app.add_type("Bad", bad);
    let mut other = value(decl(&[], vec![r(K::Import, int32), E]));
    other.fields = fields(&[("z", 0)]);
    app.add_type("Other", other);

    let loader = loader(vec![core(), app.build()]);
    register_integers(&loader);

    let good = load(&loader, "App.Good", &[]).unwrap();
    let user = loader
        .get_type_by_name("App", "App.User", vec![vec![good]])
        .unwrap();
    assert_eq!(
        user.exports.get("H/x"),
        Some(&ExportValue::Field(FieldHandle { owner: good, index: 1 }))
    );

    let bad = load(&loader, "App.Bad", &[]).unwrap();
    let other = load(&loader, "App.Other", &[]).unwrap();
    let before = loader.loaded_type_count();
    assert_eq!(load(&loader, "App.User", &[bad]), Err(ErrorCode::Generic));
    assert_eq!(load(&loader, "App.User", &[other]), Err(ErrorCode::Generic));
    assert_eq!(loader.loaded_type_count(), before);
}

#[test]
fn test_subtype_of_segmented_argument() {
    let mut app = AssemblyBuilder::new("App");
    let int32 = app.import_type("Core", "Core.Int32", &[]);

    // Pick<[A], [B]> requires SAME(B::Item, Int32); field item: B::Item
    let mut pick_decl = with_constraints(
        &[1, 1],
        vec![
            r(K::ArgumentSeg, 1),
            r(K::Argument, 0),
            r(K::Subtype, 0),
            E,
            r(K::Import, int32),
            E,
        ],
        vec![constraint(ConstraintKind::Same, 0, 2, &[4], "")],
    );
    pick_decl.names = vec!["Item".to_string()];
    let mut pick = value(pick_decl);
    pick.fields = fields(&[("item", 2)]);
    app.add_type("Pick", pick);

    let mut container = value(decl(&[], vec![r(K::Import, int32), E]));
    container.public_subtypes = vec![named("Item", 0)];
    app.add_type("Container", container);
    app.add_type("Plain", value(decl(&[], vec![])));

    let loader = loader(vec![core(), app.build()]);
    register_integers(&loader);
    let int32 = loader.get_type_by_name("Core", "Core.Int32", vec![]).unwrap();
    let container = load(&loader, "App.Container", &[]).unwrap();
    let plain = load(&loader, "App.Plain", &[]).unwrap();

    let picked = loader
        .get_type_by_name("App", "App.Pick", vec![vec![plain], vec![container]])
        .unwrap();
    assert_eq!(picked.field("item").map(|f| f.field_type), Some(int32.id));

    let err = loader
        .get_type_by_name("App", "App.Pick", vec![vec![container], vec![plain]])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Generic);
}

#[test]
fn test_trait_requiring_itself_is_circular() {
    let mut app = AssemblyBuilder::new("App");
    // trait Loop requires Loop on Self
    let mut looping = trait_template(vec![r(K::SelfType, 0)]);
    looping.generic.constraints = vec![constraint(ConstraintKind::TraitAssembly, 0, 0, &[], "")];
    let looping = app.add_trait("Loop", looping);
    let empty = app.add_trait("Empty", trait_template(vec![]));

    app.add_type(
        "Holder",
        value(with_constraints(
            &[1],
            vec![r(K::Argument, 0)],
            vec![constraint(ConstraintKind::TraitAssembly, looping, 0, &[], "")],
        )),
    );
    // A type whose constraints are checked on itself.
    app.add_type(
        "Selfish",
        value(with_constraints(
            &[],
            vec![r(K::SelfType, 0)],
            vec![constraint(ConstraintKind::TraitAssembly, empty, 0, &[], "")],
        )),
    );
    app.add_type("D", value(decl(&[], vec![])));
    let loader = loader(vec![core(), app.build()]);

    let d = load(&loader, "App.D", &[]).unwrap();
    assert_eq!(load(&loader, "App.Holder", &[d]), Err(ErrorCode::Circular));
    assert_eq!(load(&loader, "App.Selfish", &[]), Err(ErrorCode::Circular));
}

#[test]
fn test_generic_trait_function_needs_rigid_match() {
    let mut app = AssemblyBuilder::new("App");
    let (good, bad, i32_) = (0, 1, 2);

    // trait Mapper { fn Map<U>(Self, U) -> U }
    let mut mapper = trait_template(vec![r(K::SelfType, 0), r(K::Argument, 0)]);
    mapper.generic_functions = vec![TraitGenericFunction {
        export_name: "map".to_string(),
        name: "Map".to_string(),
        extra_parameters: 1,
        return_type: Some(1),
        parameters: vec![0, 1],
    }];
    let mapper = app.add_trait("Mapper", mapper);

    let mut good_type = value(decl(&[], vec![r(K::Assembly, 0), r(K::Argument, 0), E]));
    good_type.public_functions = vec![named("Map", 0)];
    app.add_type("Good", good_type);
    let mut bad_type = value(decl(&[], vec![r(K::Assembly, 1), r(K::Argument, 0), E]));
    bad_type.public_functions = vec![named("Map", 0)];
    app.add_type("Bad", bad_type);
    app.add_type("I32", value(decl(&[], vec![])));

    // Map<U>(Good, U) -> U
    let map = app.add_function(
        "Map",
        function(
            decl(&[1], vec![r(K::Argument, 0), r(K::Assembly, good), E]),
            Some(0),
            &[1, 0],
        ),
    );
    // MapBad<U>(Bad, U) -> I32
    app.add_function(
        "MapBad",
        function(
            decl(
                &[1],
                vec![r(K::Argument, 0), r(K::Assembly, bad), E, r(K::Assembly, i32_), E],
            ),
            Some(3),
            &[1, 0],
        ),
    );

    let mut user = with_constraints(
        &[1],
        vec![r(K::Argument, 0), r(K::Constraint, 0)],
        vec![constraint(ConstraintKind::TraitAssembly, mapper, 0, &[], "Mp")],
    );
    user.names = vec!["Mp/map".to_string()];
    app.add_type("User", value(user));
    let loader = loader(vec![core(), app.build()]);

    let good = load(&loader, "App.Good", &[]).unwrap();
    let user = loader
        .get_type_by_name("App", "App.User", vec![vec![good]])
        .unwrap();
    assert_eq!(
        user.exports.get("Mp/map"),
        Some(&ExportValue::GenericFunction(TemplateRef::new("App", map)))
    );

    let bad = load(&loader, "App.Bad", &[]).unwrap();
    assert_eq!(load(&loader, "App.User", &[bad]), Err(ErrorCode::Generic));
}

#[test]
fn test_base_and_interface_constraints() {
    let mut app = AssemblyBuilder::new("App");
    let (animal, pet) = (0, 3);
    app.add_type("Animal", reference(decl(&[], vec![])));
    let mut dog = reference(decl(&[], local(animal)));
    dog.base = Some(0);
    app.add_type("Dog", dog);
    app.add_type("Rock", reference(decl(&[], vec![])));
    app.add_type(
        "IPet",
        type_template(StorageMode::Interface, decl(&[], vec![])),
    );
    let mut cat = reference(decl(&[], local(pet)));
    cat.interfaces = vec![0];
    app.add_type("Cat", cat);

    app.add_type(
        "NeedsAnimal",
        value(with_constraints(
            &[1],
            vec![r(K::Argument, 0), r(K::Assembly, animal), E],
            vec![constraint(ConstraintKind::Base, 0, 0, &[1], "")],
        )),
    );
    app.add_type(
        "NeedsPet",
        value(with_constraints(
            &[1],
            vec![r(K::Argument, 0), r(K::Assembly, pet), E],
            vec![constraint(ConstraintKind::Interface, 0, 0, &[1], "")],
        )),
    );
    let loader = loader(vec![core(), app.build()]);

    let animal = load(&loader, "App.Animal", &[]).unwrap();
    let dog = load(&loader, "App.Dog", &[]).unwrap();
    let rock = load(&loader, "App.Rock", &[]).unwrap();
    let cat = load(&loader, "App.Cat", &[]).unwrap();

    assert!(load(&loader, "App.NeedsAnimal", &[dog]).is_ok());
    assert!(load(&loader, "App.NeedsAnimal", &[animal]).is_ok());
    assert_eq!(load(&loader, "App.NeedsAnimal", &[rock]), Err(ErrorCode::Generic));

    assert!(load(&loader, "App.NeedsPet", &[cat]).is_ok());
    assert_eq!(load(&loader, "App.NeedsPet", &[dog]), Err(ErrorCode::Generic));
}
