//! `#[bus_event]` 的派生合并
//!
//! 载荷必需的派生排在最前，用户自己写的 `#[derive(...)]` 合并进来并去重；
//! 无法解析的派生列表直接报错，而不是原样留给编译器。
use quote::ToTokens;
use std::collections::HashSet;
use syn::punctuated::Punctuated;
use syn::{Attribute, Path, Token};

struct DeriveSet {
    seen: HashSet<String>,
    paths: Vec<Path>,
}

impl DeriveSet {
    fn new(required: Vec<Path>) -> Self {
        let mut set = Self {
            seen: HashSet::new(),
            paths: Vec::new(),
        };
        required.into_iter().for_each(|p| set.insert(p));
        set
    }

    fn insert(&mut self, path: Path) {
        if self.seen.insert(dedup_key(&path)) {
            self.paths.push(path);
        }
    }

    fn into_attribute(self) -> Attribute {
        let paths = self.paths;
        syn::parse_quote!(#[derive(#(#paths),*)])
    }
}

// `Serialize` 与 `serde::Serialize` 视为同一项
fn dedup_key(path: &Path) -> String {
    let Some(last) = path.segments.last() else {
        return path.to_token_stream().to_string();
    };
    let ident = last.ident.to_string();
    if matches!(ident.as_str(), "Serialize" | "Deserialize") {
        format!("serde::{ident}")
    } else {
        ident
    }
}

fn derive_list(attr: &Attribute) -> syn::Result<Punctuated<Path, Token![,]>> {
    attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated)
        .map_err(|cause| {
            let mut err = syn::Error::new_spanned(attr, "malformed #[derive(...)] on a bus event");
            err.combine(cause);
            err
        })
}

/// 把合并后的 derive 放在属性列表最前，其余属性保持原顺序
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<Path>) -> syn::Result<()> {
    let mut derives = DeriveSet::new(required);
    let mut retained = Vec::with_capacity(attrs.len());
    for attr in attrs.drain(..) {
        if !attr.path().is_ident("derive") {
            retained.push(attr);
            continue;
        }
        for path in derive_list(&attr)? {
            derives.insert(path);
        }
    }

    retained.insert(0, derives.into_attribute());
    *attrs = retained;
    Ok(())
}
