//! Subnet and security group selection.

use tracing::debug;

use super::error::ProvisionError;
use super::spec::{Placement, SecurityGroupChoice};
use crate::provider::{ComputeApi, Subnet};
use crate::select::Selector;

/// Placement with every choice made.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedPlacement {
    /// Subnet to launch into.
    pub subnet_id: String,
    /// Security groups; empty selects the network default.
    pub security_group_ids: Vec<String>,
}

/// Completes a [`Placement`], asking `selector` for anything left unset.
///
/// Explicit values are used verbatim without any provider call. An unset
/// security group is chosen among the groups of the chosen subnet's network.
///
/// # Errors
///
/// Returns [`ProvisionError::NoEligiblePlacement`] when there is nothing to
/// choose from, or the selector's or provider's failure.
pub async fn resolve_placement(
    compute: &dyn ComputeApi,
    selector: &dyn Selector,
    placement: &Placement,
) -> Result<ResolvedPlacement, ProvisionError> {
    let mut chosen_subnet: Option<Subnet> = None;
    let subnet_id = if let Some(subnet_id) = &placement.subnet_id {
        subnet_id.clone()
    } else {
        let subnet = choose_subnet(compute, selector).await?;
        let id = subnet.subnet_id.clone();
        chosen_subnet = Some(subnet);
        id
    };

    let security_group_ids = match &placement.security_group {
        SecurityGroupChoice::Explicit(group) => vec![group.clone()],
        SecurityGroupChoice::NetworkDefault => Vec::new(),
        SecurityGroupChoice::Unset => {
            let subnet = match chosen_subnet {
                Some(subnet) => subnet,
                None => compute
                    .describe_subnet(&subnet_id)
                    .await
                    .map_err(ProvisionError::from_lookup)?,
            };
            vec![choose_security_group(compute, selector, &subnet.vpc_id).await?]
        }
    };

    debug!(subnet_id, ?security_group_ids, "placement resolved");
    Ok(ResolvedPlacement {
        subnet_id,
        security_group_ids,
    })
}

async fn choose_subnet(
    compute: &dyn ComputeApi,
    selector: &dyn Selector,
) -> Result<Subnet, ProvisionError> {
    let mut eligible: Vec<Subnet> = compute
        .list_subnets()
        .await
        .map_err(ProvisionError::from_lookup)?
        .into_iter()
        .filter(Subnet::is_eligible)
        .collect();
    if eligible.is_empty() {
        return Err(ProvisionError::NoEligiblePlacement {
            reason: String::from("no available subnet with free addresses"),
        });
    }
    let labels: Vec<String> = eligible.iter().map(Subnet::label).collect();
    let index = selector.select("Select a subnet for the bastion", &labels)?;
    if index >= eligible.len() {
        return Err(ProvisionError::NoEligiblePlacement {
            reason: format!("subnet choice {index} is out of range"),
        });
    }
    Ok(eligible.swap_remove(index))
}

async fn choose_security_group(
    compute: &dyn ComputeApi,
    selector: &dyn Selector,
    vpc_id: &str,
) -> Result<String, ProvisionError> {
    let groups = compute
        .list_security_groups(vpc_id)
        .await
        .map_err(ProvisionError::from_lookup)?;
    if groups.is_empty() {
        return Err(ProvisionError::NoEligiblePlacement {
            reason: format!("no security group in network {vpc_id}"),
        });
    }
    let labels: Vec<String> = groups.iter().map(|group| group.label()).collect();
    let index = selector.select("Select a security group for the bastion", &labels)?;
    groups
        .get(index)
        .map(|group| group.group_id.clone())
        .ok_or_else(|| ProvisionError::NoEligiblePlacement {
            reason: format!("security group choice {index} is out of range"),
        })
}
