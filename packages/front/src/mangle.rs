use cu::pre::*;
use embercc_sema::{BaseType, RefQual, TypeSpecifier};

use crate::{Platform, Session};

/// ABI-stable linkage names
///
/// Linux uses Itanium-style mangling, Windows a reduced MSVC flavor. Both
/// are pure functions of the qualified name, the parameter types and the
/// return type, so structurally identical instantiations agree byte for
/// byte regardless of declaration order. The in-compiler identifier of a
/// template instantiation is the separate `base$hash` name produced by
/// [`crate::tpl::mangle_template_name`].
pub fn mangle_function(
    sess: &Session,
    name: &str,
    ns: &[String],
    params: &[TypeSpecifier],
    ret: &TypeSpecifier,
) -> String {
    match sess.options.platform {
        Platform::Linux => mangle_itanium(sess, name, ns, params, ret),
        Platform::Windows => mangle_msvc(sess, name, ns, params, ret),
    }
}

fn mangle_itanium(
    sess: &Session,
    name: &str,
    ns: &[String],
    params: &[TypeSpecifier],
    ret: &TypeSpecifier,
) -> String {
    let mut out = String::from("_Z");
    if ns.is_empty() {
        source_name(name, &mut out);
    } else {
        out.push('N');
        for seg in ns {
            source_name(seg, &mut out);
        }
        source_name(name, &mut out);
        out.push('E');
    }
    // return type participates so that distinct instantiations of the
    // same template never collide
    itanium_type(sess, ret, &mut out);
    if params.is_empty() {
        out.push('v');
    } else {
        for p in params {
            itanium_type(sess, p, &mut out);
        }
    }
    out
}

fn source_name(name: &str, out: &mut String) {
    use std::fmt::Write;
    // instantiation names carry `$`; encode it mangling-safe
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let _ = write!(out, "{}{}", clean.len(), clean);
}

pub(crate) fn itanium_type(sess: &Session, t: &TypeSpecifier, out: &mut String) {
    match t.ref_qual {
        RefQual::LValue => out.push('R'),
        RefQual::RValue => out.push('O'),
        RefQual::None => {}
    }
    // pointer levels, outermost first
    for cv in t.ptr.iter().rev() {
        out.push('P');
        if cv.is_const {
            out.push('K');
        }
        if cv.is_volatile {
            out.push('V');
        }
    }
    if t.is_array {
        use std::fmt::Write;
        out.push('A');
        if let Some(n) = t.array_len {
            let _ = write!(out, "{n}");
        }
        out.push('_');
    }
    if t.cv.is_const {
        out.push('K');
    }
    if t.cv.is_volatile {
        out.push('V');
    }
    match t.base {
        BaseType::Void => out.push('v'),
        BaseType::Bool => out.push('b'),
        BaseType::Char => out.push('c'),
        BaseType::UnsignedChar => out.push('h'),
        BaseType::Short => out.push('s'),
        BaseType::UnsignedShort => out.push('t'),
        BaseType::Int => out.push('i'),
        BaseType::UnsignedInt => out.push('j'),
        BaseType::Long => out.push('l'),
        BaseType::UnsignedLong => out.push('m'),
        BaseType::LongLong => out.push('x'),
        BaseType::UnsignedLongLong => out.push('y'),
        BaseType::Float => out.push('f'),
        BaseType::Double => out.push('d'),
        BaseType::LongDouble => out.push('e'),
        BaseType::Nullptr => out.push_str("Dn"),
        BaseType::Auto => out.push_str("Da"),
        _ => {
            let name = if t.index.is_valid() {
                sess.types
                    .get(t.index)
                    .map(|i| sess.strings.view(i.name))
                    .unwrap_or("")
            } else if t.name.is_valid() {
                sess.strings.view(t.name)
            } else {
                ""
            };
            if name.is_empty() {
                out.push_str("8__anon__");
            } else {
                source_name(name, out);
            }
        }
    }
}

fn mangle_msvc(
    sess: &Session,
    name: &str,
    ns: &[String],
    params: &[TypeSpecifier],
    ret: &TypeSpecifier,
) -> String {
    let mut out = String::from("?");
    out.push_str(name);
    for seg in ns.iter().rev() {
        out.push('@');
        out.push_str(seg);
    }
    out.push_str("@@YA");
    msvc_type(sess, ret, &mut out);
    if params.is_empty() {
        out.push('X');
    } else {
        for p in params {
            msvc_type(sess, p, &mut out);
        }
        out.push('@');
    }
    out.push('Z');
    out
}

fn msvc_type(sess: &Session, t: &TypeSpecifier, out: &mut String) {
    if t.is_reference() {
        out.push_str("AEA");
    }
    for _ in &t.ptr {
        out.push_str("PEA");
    }
    match t.base {
        BaseType::Void => out.push('X'),
        BaseType::Bool => out.push_str("_N"),
        BaseType::Char => out.push('D'),
        BaseType::UnsignedChar => out.push('E'),
        BaseType::Short => out.push('F'),
        BaseType::UnsignedShort => out.push('G'),
        BaseType::Int => out.push('H'),
        BaseType::UnsignedInt => out.push('I'),
        BaseType::Long => out.push('J'),
        BaseType::UnsignedLong => out.push('K'),
        BaseType::LongLong => out.push_str("_J"),
        BaseType::UnsignedLongLong => out.push_str("_K"),
        BaseType::Float => out.push('M'),
        BaseType::Double => out.push('N'),
        BaseType::LongDouble => out.push('O'),
        _ => {
            out.push('V');
            let name = if t.index.is_valid() {
                sess.types
                    .get(t.index)
                    .map(|i| sess.strings.view(i.name))
                    .unwrap_or("anon")
            } else {
                "anon"
            };
            for c in name.chars() {
                out.push(if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                });
            }
            out.push_str("@@");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use embercc_sema::Cv;

    #[test]
    fn test_itanium_basic() {
        let sess = Session::new(Options::default());
        let ret = TypeSpecifier::prim(BaseType::Int);
        let params = vec![TypeSpecifier::prim(BaseType::Int)];
        let m = mangle_function(&sess, "id", &[], &params, &ret);
        assert_eq!(m, "_Z2idii");
    }

    #[test]
    fn test_itanium_namespaced_with_qualifiers() {
        let sess = Session::new(Options::default());
        let ret = TypeSpecifier::prim(BaseType::Void);
        let mut p = TypeSpecifier::prim(BaseType::Char);
        p.cv = Cv::CONST;
        p.ptr.push(Cv::NONE);
        p.ref_qual = RefQual::LValue;
        let m = mangle_function(&sess, "log", &["core".to_string()], &[p], &ret);
        assert_eq!(m, "_ZN4core3logEvRPKc");
    }

    #[test]
    fn test_deterministic_across_sessions() {
        let a = {
            let sess = Session::new(Options::default());
            mangle_function(
                &sess,
                "f",
                &[],
                &[TypeSpecifier::prim(BaseType::Double)],
                &TypeSpecifier::prim(BaseType::Double),
            )
        };
        let b = {
            let sess = Session::new(Options::default());
            mangle_function(
                &sess,
                "f",
                &[],
                &[TypeSpecifier::prim(BaseType::Double)],
                &TypeSpecifier::prim(BaseType::Double),
            )
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_msvc_flavor() {
        let mut opts = Options::default();
        opts.platform = Platform::Windows;
        let sess = Session::new(opts);
        let m = mangle_function(
            &sess,
            "twice",
            &[],
            &[TypeSpecifier::prim(BaseType::Int)],
            &TypeSpecifier::prim(BaseType::Int),
        );
        assert!(m.starts_with("?twice@@YA"));
        assert!(m.ends_with('Z'));
    }
}
