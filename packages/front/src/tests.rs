use cu::pre::*;
use embercc_sema::{BaseType, Expr, Node, RefQual};

use crate::tpl::SubstMap;
use crate::{Options, Parser, RecordingSink, Session, emit_declarations, lex};

fn compile(src: &str) -> Session {
    compile_with(src, Options::default())
}

fn compile_with(src: &str, options: Options) -> Session {
    let tokens = lex(src, 0).expect("lexing failed");
    let mut sess = Session::new(options);
    let mut parser = Parser::new(&mut sess, tokens);
    parser.parse_translation_unit().expect("parsing failed");
    drop(parser);
    sess
}

fn errors(sess: &Session) -> Vec<String> {
    sess.diags
        .records()
        .iter()
        .filter(|d| d.severity == crate::Severity::Error)
        .map(|d| d.message.clone())
        .collect()
}

fn instantiated_funcs<'a>(sess: &'a Session, name: &str) -> Vec<&'a embercc_sema::FuncDecl> {
    sess.top_level
        .iter()
        .filter_map(|n| sess.nodes.func(*n))
        .filter(|f| sess.view(f.name) == name)
        .collect()
}

fn instantiated_type<'a>(
    sess: &'a Session,
    base: &str,
    args_contains: &str,
) -> Option<&'a embercc_sema::TypeInfo> {
    sess.types.iter().find(|i| {
        let name = sess.view(i.name);
        name.starts_with(&format!("{base}$"))
            && i.inst.as_ref().is_some_and(|m| {
                !m.incomplete_instantiation
                    && crate::tpl::args_key(&m.args, &sess.strings).contains(args_contains)
            })
    })
}

// -- end-to-end scenarios ---------------------------------------------------

#[test]
fn test_function_template_argument_deduction() {
    let sess = compile(
        r#"
        template<typename T> T id(T x) { return x; }
        int main() { return id(42); }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let insts = instantiated_funcs(&sess, "id");
    assert_eq!(insts.len(), 1, "exactly one instantiation of id");
    let f = insts[0];
    assert_eq!(f.ret.base, BaseType::Int);
    assert_eq!(f.params.len(), 1);
    assert_eq!(f.params[0].ty.base, BaseType::Int);
    assert_eq!(f.mangled.as_ref().unwrap().as_ref(), "_Z2idii");
    // the body re-parsed into `{ return x; }`
    let body = f.body.expect("body materialized");
    let block = sess.nodes.block(body).expect("body is a block");
    assert_eq!(block.stmts.len(), 1);
    let Some(Node::Return(r)) = sess.nodes.get(block.stmts[0]) else {
        panic!("body statement is not a return");
    };
    assert!(matches!(
        sess.nodes.expr(r.value.unwrap()),
        Some(Expr::Ident(_))
    ));
    assert!(f.inline_always, "pure forwarding body inlines at call sites");
}

#[test]
fn test_instantiation_is_idempotent() {
    let sess = compile(
        r#"
        template<typename T> T id(T x) { return x; }
        int main() { return id(1) + id(2) + id(3); }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    // the cache returns the same node; nothing is cloned
    assert_eq!(instantiated_funcs(&sess, "id").len(), 1);
}

#[test]
fn test_partial_specialization_recursive_instantiation() {
    let sess = compile(
        r#"
        template<typename... Ts> struct Tuple;
        template<typename F, typename... R> struct Tuple<F, R...> : Tuple<R...> { F v; };
        template<> struct Tuple<> {};
        Tuple<int, float, char> t;
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());

    let full = instantiated_type(&sess, "Tuple", "int,float,char")
        .expect("Tuple<int,float,char> materialized");
    let s = full.strukt.as_ref().expect("laid out");
    assert_eq!(s.members.len(), 1);
    assert_eq!(sess.view(s.members[0].name), "v");
    assert_eq!(s.members[0].ty.base, BaseType::Int);
    assert_eq!(s.members[0].offset, 0);
    assert_eq!(s.bases.len(), 1);
    assert!(
        s.bases[0].offset == 4 || s.bases[0].offset == 8,
        "base respects float alignment, got {}",
        s.bases[0].offset
    );

    // the base chain points to the previous instantiation by type index
    let mid = sess.types.get(s.bases[0].index).expect("Tuple<float,char>");
    let mid_args = crate::tpl::args_key(&mid.inst.as_ref().unwrap().args, &sess.strings);
    assert_eq!(mid_args, "float,char");
    let mid_s = mid.strukt.as_ref().unwrap();
    assert_eq!(mid_s.members[0].ty.base, BaseType::Float);
    let inner = sess.types.get(mid_s.bases[0].index).expect("Tuple<char>");
    let inner_args = crate::tpl::args_key(&inner.inst.as_ref().unwrap().args, &sess.strings);
    assert_eq!(inner_args, "char");
    let inner_s = inner.strukt.as_ref().unwrap();
    assert_eq!(inner_s.bases.len(), 1);
    let empty = sess.types.get(inner_s.bases[0].index).expect("Tuple<>");
    assert!(empty.strukt.as_ref().unwrap().members.is_empty());
    assert_eq!(empty.size_bits, 8);
}

#[test]
fn test_sfinae_overload_selection() {
    let sess = compile(
        r#"
        template<typename T> auto f(T x) -> decltype(x.foo(), void());
        template<typename T> void f(T x);
        int main() { f(42); return 0; }
        "#,
    );
    // the first overload fails at the trailing-return re-parse and is
    // silently skipped; no error is reported
    assert_eq!(errors(&sess), Vec::<String>::new());
    let insts = instantiated_funcs(&sess, "f");
    assert_eq!(insts.len(), 1);
    assert!(insts[0].ret.is_void());
}

#[test]
fn test_concept_constraint_rejection() {
    let sess = compile(
        r#"
        template<typename T> concept Integral = __is_integral(T);
        template<Integral T> T twice(T x) { return x + x; }
        int main() { twice(3.14); return 0; }
        "#,
    );
    let errs = errors(&sess);
    assert!(!errs.is_empty(), "constraint failure must be diagnosed");
    let msg = errs.join("\n");
    assert!(msg.contains("Integral"), "diagnostic names the concept: {msg}");
    assert!(msg.contains("double"), "diagnostic names the argument: {msg}");
    // no instantiation is cached
    assert!(instantiated_funcs(&sess, "twice").is_empty());
}

#[test]
fn test_concept_accepts_satisfying_argument() {
    let sess = compile(
        r#"
        template<typename T> concept Integral = __is_integral(T);
        template<Integral T> T twice(T x) { return x + x; }
        int main() { return twice(21); }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    assert_eq!(instantiated_funcs(&sess, "twice").len(), 1);
}

#[test]
fn test_variadic_fold_evaluation() {
    let sess = compile(
        r#"
        template<bool... Bs> struct all { static constexpr bool value = (Bs && ...); };
        static_assert(all<true, true, false>::value == false);
        static_assert(all<true, true>::value == true);
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let info = instantiated_type(&sess, "all", "1,1,0").expect("all<true,true,false>");
    let s = info.strukt.as_ref().unwrap();
    let value = s.static_members.iter().find(|m| sess.view(m.name) == "value");
    // the initializer folded to a literal at instantiation time
    assert_eq!(value.unwrap().value, Some(0));
}

#[test]
fn test_cycle_in_trailing_return_decltype() {
    let sess = compile(
        r#"
        template<typename T> auto niter(T x) -> decltype(niter(x));
        template<typename T> T niter(T x) { return x; }
        int main() { return niter(7); }
        "#,
    );
    // the cycle guard removes the self-referential overload; the base
    // overload is selected without blowing the stack
    assert_eq!(errors(&sess), Vec::<String>::new());
    let insts = instantiated_funcs(&sess, "niter");
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].ret.base, BaseType::Int);
    assert!(insts[0].body.is_some());
}

// -- further engine coverage ------------------------------------------------

#[test]
fn test_forwarding_reference_collapsing() {
    let sess = compile(
        r#"
        template<typename T> void g(T&& x);
        int main() { int a = 1; g(a); g(2); return 0; }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let insts = instantiated_funcs(&sess, "g");
    assert_eq!(insts.len(), 2, "lvalue and rvalue arguments instantiate separately");
    let quals: Vec<RefQual> = insts.iter().map(|f| f.params[0].ty.ref_qual).collect();
    // T& && -> T&, T && -> T&&
    assert!(quals.contains(&RefQual::LValue));
    assert!(quals.contains(&RefQual::RValue));
    let mangled: Vec<&str> = insts
        .iter()
        .map(|f| f.mangled.as_ref().unwrap().as_ref())
        .collect();
    assert_ne!(mangled[0], mangled[1]);
}

#[test]
fn test_explicit_template_arguments() {
    let sess = compile(
        r#"
        template<typename T> T zero() { return T(); }
        int main() { return zero<int>(); }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let insts = instantiated_funcs(&sess, "zero");
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].ret.base, BaseType::Int);
}

#[test]
fn test_default_argument_through_member_alias() {
    let sess = compile(
        r#"
        template<typename T> struct wrapper { using type = T; };
        template<typename T, typename U = wrapper<T>::type> struct box { U u; };
        box<int> b;
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let info = instantiated_type(&sess, "box", "int").expect("box<int>");
    let s = info.strukt.as_ref().unwrap();
    assert_eq!(s.members[0].ty.base, BaseType::Int);
}

#[test]
fn test_non_type_parameter_defaults() {
    let sess = compile(
        r#"
        template<typename T, int N = sizeof(T)> struct sized { char data[N]; };
        sized<double> s;
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let info = instantiated_type(&sess, "sized", "double,8").expect("sized<double, 8>");
    let s = info.strukt.as_ref().unwrap();
    assert_eq!(s.members[0].ty.array_len, Some(8));
    assert_eq!(info.size_bits, 64);
}

#[test]
fn test_sizeof_pack() {
    let sess = compile(
        r#"
        template<typename... Ts> struct count { static constexpr int value = sizeof...(Ts); };
        static_assert(count<int, float, char>::value == 3);
        static_assert(count<>::value == 0);
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
}

#[test]
fn test_full_specialization_preferred_over_primary() {
    let sess = compile(
        r#"
        template<typename T> struct traits { static constexpr int value = 1; };
        template<> struct traits<bool> { static constexpr int value = 2; };
        static_assert(traits<int>::value == 1);
        static_assert(traits<bool>::value == 2);
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
}

#[test]
fn test_static_assert_failure_is_reported_not_fatal() {
    let sess = compile(
        r#"
        static_assert(1 == 2, "numbers drifted");
        int ok() { return 1; }
        "#,
    );
    let errs = errors(&sess);
    assert_eq!(errs.len(), 1);
    assert!(errs[0].contains("numbers drifted"));
    // compilation continued past the failure
    assert_eq!(instantiated_funcs(&sess, "ok").len(), 1);
}

#[test]
fn test_enum_constants_in_constant_expressions() {
    let sess = compile(
        r#"
        enum Color { Red, Green = 5, Blue };
        static_assert(Blue == 6);
        static_assert(Color::Green == 5);
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
}

#[test]
fn test_struct_layout_members_and_padding() {
    let sess = compile(
        r#"
        struct Mixed { char a; double b; int c; };
        union U { int i; double d; };
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let info = sess
        .types
        .iter()
        .find(|i| sess.view(i.name) == "Mixed")
        .unwrap();
    let s = info.strukt.as_ref().unwrap();
    assert_eq!(s.members[1].offset, 8);
    assert_eq!(s.members[2].offset, 16);
    assert_eq!(s.total_size, 24);
    assert_eq!(s.total_size % s.alignment, 0);
    for m in &s.members {
        assert_eq!(m.offset % m.align, 0);
    }
    let u = sess
        .types
        .iter()
        .find(|i| sess.view(i.name) == "U")
        .unwrap();
    assert_eq!(u.strukt.as_ref().unwrap().total_size, 8);
}

#[test]
fn test_lazy_member_function_realized_on_first_call() {
    let mut options = Options::default();
    options.lazy_instantiation = true;
    let sess = compile_with(
        r#"
        template<typename T> struct holder {
            T item;
            T get() { return item; }
        };
        int main() { holder<int> h; return h.get(); }
        "#,
        options,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let entry = sess
        .lazy_methods
        .iter()
        .find(|m| sess.view(m.member) == "get")
        .expect("get registered for lazy realization");
    assert!(entry.realized, "body realized on first call");
    let body = sess.nodes.func(entry.decl).and_then(|f| f.body);
    assert!(body.is_some());
}

#[test]
fn test_lazy_static_member_folds_on_first_use() {
    let mut options = Options::default();
    options.lazy_instantiation = true;
    let sess = compile_with(
        r#"
        template<bool... Bs> struct all { static constexpr bool value = (Bs && ...); };
        static_assert(all<true, false>::value == false);
        "#,
        options,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    // the initializer was registered for lazy realization, then folded
    // when the static_assert read it
    assert!(!sess.lazy_statics.is_empty());
    let info = instantiated_type(&sess, "all", "1,0").expect("all<true,false>");
    let s = info.strukt.as_ref().unwrap();
    assert_eq!(s.static_members[0].value, Some(0));
}

#[test]
fn test_requires_clause_filters_overloads() {
    let sess = compile(
        r#"
        template<typename T> concept Big = sizeof(T) >= 8;
        template<typename T> requires Big<T> int pick(T x) { return 8; }
        template<typename T> int pick(T x) { return 1; }
        int main() { pick('c'); pick(1.0); return 0; }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    // char fails Big and falls through; double satisfies it
    assert_eq!(instantiated_funcs(&sess, "pick").len(), 2);
}

#[test]
fn test_requires_expression_member_check() {
    let sess = compile(
        r#"
        struct S { int foo() { return 1; } };
        template<typename T> concept HasFoo = requires(T x) { x.foo(); };
        template<typename T> requires HasFoo<T> int call(T x) { return 1; }
        template<typename T> int call(T x) { return 0; }
        int main() { S s; call(s); call(42); return 0; }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    assert_eq!(instantiated_funcs(&sess, "call").len(), 2);
}

#[test]
fn test_out_of_line_member_definition() {
    let sess = compile(
        r#"
        template<typename T> struct S { T get(); };
        template<typename T> T S<T>::get() { return T(); }
        int main() { S<int> s; return s.get(); }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let info = instantiated_type(&sess, "S", "int").expect("S<int>");
    let s = info.strukt.as_ref().unwrap();
    let get = s
        .methods
        .iter()
        .find_map(|m| sess.nodes.func(*m).filter(|f| sess.view(f.name) == "get"))
        .expect("get materialized");
    assert_eq!(get.ret.base, BaseType::Int);
    assert!(get.body.is_some(), "out-of-line body attached");
}

#[test]
fn test_substitution_identity_round_trip() {
    let mut sess = Session::new(Options::default());
    let tokens = lex("1 + 2 * x - y", 0).unwrap();
    let mut parser = Parser::new(&mut sess, tokens);
    let e = parser.parse_expr().unwrap();
    let map = SubstMap::default();
    let copy = parser.subst_expr(e, &map).unwrap();
    assert!(exprs_structurally_equal(&sess, e, copy));
}

fn exprs_structurally_equal(
    sess: &Session,
    a: embercc_sema::NodeId,
    b: embercc_sema::NodeId,
) -> bool {
    let (Some(ea), Some(eb)) = (sess.nodes.expr(a), sess.nodes.expr(b)) else {
        return false;
    };
    match (ea, eb) {
        (Expr::IntLit { value: va, .. }, Expr::IntLit { value: vb, .. }) => va == vb,
        (Expr::Ident(na), Expr::Ident(nb)) => na == nb,
        (
            Expr::Binary {
                op: oa,
                lhs: la,
                rhs: ra,
            },
            Expr::Binary {
                op: ob,
                lhs: lb,
                rhs: rb,
            },
        ) => {
            oa == ob
                && exprs_structurally_equal(sess, *la, *lb)
                && exprs_structurally_equal(sess, *ra, *rb)
        }
        (Expr::Unary { op: oa, operand: a }, Expr::Unary { op: ob, operand: b }) => {
            oa == ob && exprs_structurally_equal(sess, *a, *b)
        }
        _ => false,
    }
}

#[test]
fn test_emit_surfaces_symbols() {
    let sess = compile(
        r#"
        int global_counter = 0;
        int add(int a, int b) { return a + b; }
        struct V { virtual int hook() { return 1; } };
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    let mut sink = RecordingSink::default();
    emit_declarations(&sess, &mut sink);
    assert!(sink.functions.iter().any(|(m, _)| m == "_Z3addiii"));
    assert!(sink.globals.iter().any(|(n, size, init)| {
        n == "global_counter" && *size == 4 && *init
    }));
}

#[test]
fn test_namespace_qualified_template() {
    let sess = compile(
        r#"
        namespace util {
            template<typename T> T pass(T x) { return x; }
        }
        int main() { return util::pass(3); }
        "#,
    );
    assert_eq!(errors(&sess), Vec::<String>::new());
    assert_eq!(instantiated_funcs(&sess, "pass").len(), 1);
}

#[test]
fn test_sfinae_monotonicity() {
    // adding an unrelated overload never changes a previously unique
    // selection
    let before = compile(
        r#"
        template<typename T> int h(T x) { return 1; }
        int main() { return h(5); }
        "#,
    );
    let after = compile(
        r#"
        template<typename T> int h(T x) { return 1; }
        template<typename T> auto h(T x) -> decltype(x.nothing(), 2);
        int main() { return h(5); }
        "#,
    );
    assert_eq!(errors(&before), Vec::<String>::new());
    assert_eq!(errors(&after), Vec::<String>::new());
    let a = instantiated_funcs(&before, "h");
    let b = instantiated_funcs(&after, "h");
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(
        a[0].mangled.as_ref().unwrap(),
        b[0].mangled.as_ref().unwrap()
    );
}
