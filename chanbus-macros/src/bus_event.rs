use crate::derive_utils::apply_derives;
use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Ident, Item, LitStr, Result as SynResult, Token};

// 解析键值参数：channel = "..."（必填）、name = "..."（缺省为类型名）
pub(crate) struct BusEventAttr {
    channel: LitStr,
    name: Option<LitStr>,
}

struct KvStr {
    key: Ident,
    _eq: Token![=],
    value: LitStr,
}

impl Parse for KvStr {
    fn parse(input: ParseStream) -> SynResult<Self> {
        Ok(Self {
            key: input.parse()?,
            _eq: input.parse()?,
            value: input.parse()?,
        })
    }
}

impl Parse for BusEventAttr {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let mut channel: Option<LitStr> = None;
        let mut name: Option<LitStr> = None;

        let pairs = Punctuated::<KvStr, Token![,]>::parse_terminated(input)?;
        for kv in pairs {
            let slot = match kv.key.to_string().as_str() {
                "channel" => &mut channel,
                "name" => &mut name,
                _ => {
                    return Err(syn::Error::new(
                        kv.key.span(),
                        "unknown key in attribute; expected 'channel' or 'name'",
                    ));
                }
            };
            if slot.is_some() {
                return Err(syn::Error::new(
                    kv.key.span(),
                    format!("duplicate key '{}' in attribute", kv.key),
                ));
            }
            *slot = Some(kv.value);
        }

        let Some(channel) = channel else {
            return Err(syn::Error::new(
                input.span(),
                "missing required key 'channel' in #[bus_event]",
            ));
        };
        if channel.value().is_empty() {
            return Err(syn::Error::new(channel.span(), "'channel' must not be empty"));
        }

        Ok(Self { channel, name })
    }
}

pub(crate) fn expand(attr: BusEventAttr, mut item: Item) -> SynResult<TokenStream> {
    let required = vec![
        syn::parse_quote!(Clone),
        syn::parse_quote!(Debug),
        syn::parse_quote!(::serde::Serialize),
        syn::parse_quote!(::serde::Deserialize),
    ];

    let (ident, generics) = match &mut item {
        Item::Struct(st) => {
            apply_derives(&mut st.attrs, required)?;
            (st.ident.clone(), st.generics.clone())
        }
        Item::Enum(en) => {
            apply_derives(&mut en.attrs, required)?;
            (en.ident.clone(), en.generics.clone())
        }
        other => {
            return Err(syn::Error::new(
                other.span(),
                "#[bus_event] can only be used on struct or enum types",
            ));
        }
    };

    if !generics.params.is_empty() {
        return Err(syn::Error::new(
            generics.span(),
            "#[bus_event] does not support generic types",
        ));
    }

    let channel = attr.channel;
    let name = attr
        .name
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));

    Ok(quote! {
        #item

        impl ::chanbus::typed::BusEvent for #ident {
            const CHANNEL: &'static str = #channel;
            const NAME: &'static str = #name;
        }
    })
}
